use std::sync::Arc;

use futures::future::join_all;
use shared::{
    domain::{NotificationKind, UserId},
    protocol::{MessageSnapshot, NotificationData, PushRequest, UserProfile},
};
use tracing::{debug, info, warn};

use crate::PushService;

pub const DEFAULT_BODY_MAX_CHARS: usize = 100;
pub const DEFAULT_ELLIPSIS: &str = "...";
pub const DEFAULT_TITLE: &str = "New message";
pub const DEFAULT_PUSH_CHANNEL_ID: &str = "chat-messages";
pub const DEFAULT_DEEP_LINK_PREFIX: &str = "safecircle://groups";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub body_max_chars: usize,
    pub ellipsis: String,
    pub default_title: String,
    pub channel_id: String,
    pub deep_link_prefix: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            body_max_chars: DEFAULT_BODY_MAX_CHARS,
            ellipsis: DEFAULT_ELLIPSIS.into(),
            default_title: DEFAULT_TITLE.into(),
            channel_id: DEFAULT_PUSH_CHANNEL_ID.into(),
            deep_link_prefix: DEFAULT_DEEP_LINK_PREFIX.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub recipient: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<UserId>,
    pub failed: Vec<DeliveryFailure>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Cuts `text` to at most `max_chars` characters. A cut body ends with
/// `marker` and is exactly `max_chars` long.
pub fn truncate_body(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let marker_chars = marker.chars().count();
    if marker_chars >= max_chars {
        return marker.chars().take(max_chars).collect();
    }
    let mut body: String = text.chars().take(max_chars - marker_chars).collect();
    body.push_str(marker);
    body
}

/// Members who should hear about `message`: everyone except the sender and
/// those who have already read it.
pub fn unread_recipients<'a>(
    message: &MessageSnapshot,
    members: &'a [UserProfile],
) -> Vec<&'a UserProfile> {
    members
        .iter()
        .filter(|member| !message.is_sent_by(&member.user_id))
        .filter(|member| !message.is_read_by(&member.user_id))
        .collect()
}

pub struct NotificationDispatcher {
    push: Arc<dyn PushService>,
    config: DispatchConfig,
}

impl NotificationDispatcher {
    pub fn new(push: Arc<dyn PushService>, config: DispatchConfig) -> Self {
        Self { push, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn title_for(&self, message: &MessageSnapshot, members: &[UserProfile]) -> String {
        members
            .iter()
            .find(|member| message.is_sent_by(&member.user_id))
            .map(|sender| sender.display_name.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or(self.config.default_title.as_str())
            .to_string()
    }

    fn deep_link_for(&self, message: &MessageSnapshot) -> String {
        format!(
            "{}/{}",
            self.config.deep_link_prefix.trim_end_matches('/'),
            message.group_id
        )
    }

    pub fn build_request(
        &self,
        message: &MessageSnapshot,
        members: &[UserProfile],
        recipient: &UserProfile,
    ) -> PushRequest {
        PushRequest {
            recipient_user_id: recipient.user_id.clone(),
            title: self.title_for(message, members),
            body: truncate_body(
                &message.text,
                self.config.body_max_chars,
                &self.config.ellipsis,
            ),
            data: NotificationData {
                kind: NotificationKind::ChatMessage,
                group_id: message.group_id.clone(),
                deep_link: self.deep_link_for(message),
            },
            channel_id: self.config.channel_id.clone(),
        }
    }

    /// Sends one push per unread member, all at once, and waits for every
    /// delivery to settle. Failures are logged and reported, never raised.
    pub async fn dispatch(
        &self,
        message: &MessageSnapshot,
        members: &[UserProfile],
    ) -> DispatchReport {
        let deliveries = unread_recipients(message, members)
            .into_iter()
            .map(|recipient| {
                let request = self.build_request(message, members, recipient);
                async move {
                    let recipient = request.recipient_user_id.clone();
                    match self.push.send_push(request).await {
                        Ok(()) => {
                            info!(
                                group_id = %message.group_id,
                                message_id = %message.message_id,
                                recipient = %recipient,
                                "push: delivered"
                            );
                            Ok(recipient)
                        }
                        Err(err) => {
                            warn!(
                                group_id = %message.group_id,
                                message_id = %message.message_id,
                                recipient = %recipient,
                                "push: delivery failed: {err:#}"
                            );
                            Err(DeliveryFailure {
                                recipient,
                                reason: format!("{err:#}"),
                            })
                        }
                    }
                }
            });

        let mut report = DispatchReport::default();
        for outcome in join_all(deliveries).await {
            match outcome {
                Ok(recipient) => report.delivered.push(recipient),
                Err(failure) => report.failed.push(failure),
            }
        }
        debug!(
            group_id = %message.group_id,
            message_id = %message.message_id,
            attempted = report.attempted(),
            failed = report.failed.len(),
            "push: dispatch settled"
        );
        report
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
