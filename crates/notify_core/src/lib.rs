use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::{
    domain::{GroupId, UserId},
    protocol::{Group, MessageSnapshot, PushRequest, UserProfile},
};

pub mod dispatcher;
pub mod error;
pub mod groups;
pub mod http;
pub mod ledger;
pub mod membership;
pub mod notifier;
pub mod pipeline;
pub mod resource_cache;
pub mod subscriptions;
pub mod ws;

#[cfg(test)]
mod test_support;

pub use dispatcher::{DispatchConfig, DispatchReport, NotificationDispatcher};
pub use groups::GroupDirectory;
pub use notifier::Notifier;
pub use pipeline::{PipelineScope, SnapshotOutcome};
pub use subscriptions::{AttachOutcome, PipelineEvent, SubscriptionManager};

/// Cumulative message-list snapshots for one group, most recent message last.
///
/// An `Err` item reports a listener failure; the store emits nothing after it.
/// Dropping the stream unsubscribes.
pub type SnapshotStream = BoxStream<'static, Result<Vec<MessageSnapshot>>>;

#[async_trait]
pub trait StreamingStore: Send + Sync {
    async fn subscribe(&self, group_id: &GroupId) -> Result<SnapshotStream>;
}

#[async_trait]
pub trait BackendService: Send + Sync {
    async fn fetch_user_profile(&self, user_id: &UserId) -> Result<UserProfile>;
    async fn fetch_user_groups(&self, principal: &UserId) -> Result<Vec<Group>>;
}

#[async_trait]
pub trait PushService: Send + Sync {
    async fn send_push(&self, request: PushRequest) -> Result<()>;
}
