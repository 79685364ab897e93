use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use notify_core::{
    http::{HttpBackend, HttpPushService},
    ws::WsStreamingStore,
    BackendService, GroupDirectory, NotificationDispatcher, Notifier, PipelineEvent,
    SubscriptionManager,
};
use shared::domain::UserId;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
struct Args {
    /// Identifier of the signed-in user whose groups are watched.
    #[arg(long)]
    principal: String,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load_settings(args.config.as_deref())?;

    let filter = EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let backend: Arc<dyn BackendService> = Arc::new(HttpBackend::new(&settings.backend_url)?);
    let push = Arc::new(HttpPushService::new(&settings.push_url)?);
    let store = Arc::new(WsStreamingStore::new(settings.stream_url.clone()));
    let dispatcher = Arc::new(NotificationDispatcher::new(push, settings.dispatch_config()));

    let notifier = Notifier::new(
        GroupDirectory::new(Arc::clone(&backend), settings.group_cache_ttl()),
        SubscriptionManager::new(store, backend, dispatcher),
    );

    let mut events = notifier.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::SnapshotHandled { group_id, outcome }) => {
                    debug!(group_id = %group_id, ?outcome, "notifier: snapshot handled");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notifier: event log lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let principal = UserId::new(args.principal);
    match notifier.start(principal).await {
        Ok(outcome) => info!(?outcome, "notifier: attached"),
        Err(err) => warn!("notifier: initial group load failed: {err}"),
    }

    let mut ticker = tokio::time::interval(settings.refresh_interval());
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("notifier: shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                match notifier.refresh(false).await {
                    Ok(outcome) => debug!(?outcome, "notifier: refreshed group list"),
                    Err(err) => warn!("notifier: group list refresh failed: {err}"),
                }
            }
        }
    }

    notifier.stop().await;
    Ok(())
}
