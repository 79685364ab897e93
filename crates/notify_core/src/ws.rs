use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use shared::{domain::GroupId, protocol::MessageSnapshot};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::{SnapshotStream, StreamingStore};

const SNAPSHOT_BUFFER: usize = 16;

pub(crate) fn websocket_base(server_url: &str) -> Result<String> {
    let server_url = server_url.trim().trim_end_matches('/');
    if server_url.starts_with("https://") {
        Ok(server_url.replacen("https://", "wss://", 1))
    } else if server_url.starts_with("http://") {
        Ok(server_url.replacen("http://", "ws://", 1))
    } else if server_url.starts_with("ws://") || server_url.starts_with("wss://") {
        Ok(server_url.to_string())
    } else {
        Err(anyhow!(
            "stream url must start with http://, https://, ws:// or wss://"
        ))
    }
}

/// Streaming store reached over a websocket per group. Each text frame holds
/// the group's current message list as a JSON array.
pub struct WsStreamingStore {
    server_url: String,
}

impl WsStreamingStore {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl StreamingStore for WsStreamingStore {
    async fn subscribe(&self, group_id: &GroupId) -> Result<SnapshotStream> {
        let ws_url = format!(
            "{}/ws/groups/{}/messages",
            websocket_base(&self.server_url)?,
            group_id
        );
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (_, mut ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let group_id = group_id.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = tx.closed() => break,
                    frame = ws_reader.next() => frame,
                };
                let item = match frame {
                    Some(Ok(Message::Text(text))) => {
                        serde_json::from_str::<Vec<MessageSnapshot>>(&text)
                            .context("invalid snapshot frame")
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => Err(anyhow!("websocket error: {err}")),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
            debug!(group_id = %group_id, "ws: snapshot reader finished");
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
