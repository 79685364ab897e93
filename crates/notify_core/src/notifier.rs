use std::sync::Arc;

use shared::domain::{GroupId, UserId};
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use crate::{
    error::FetchError,
    groups::GroupDirectory,
    subscriptions::{AttachOutcome, PipelineEvent, SubscriptionManager},
};

/// Binds the group directory to the subscription manager for one principal.
pub struct Notifier {
    directory: GroupDirectory,
    subscriptions: SubscriptionManager,
    principal: Mutex<Option<UserId>>,
}

impl Notifier {
    pub fn new(directory: GroupDirectory, subscriptions: SubscriptionManager) -> Self {
        Self {
            directory,
            subscriptions,
            principal: Mutex::new(None),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.subscriptions.subscribe_events()
    }

    pub async fn start(&self, principal: UserId) -> Result<AttachOutcome, FetchError> {
        info!(principal = %principal, "notifier: starting");
        *self.principal.lock().await = Some(principal);
        self.refresh(false).await
    }

    /// Re-reads the group list and re-attaches when it changed. An unchanged
    /// list comes back as the same `Arc`, so listeners and the delivery
    /// ledger survive the refresh.
    pub async fn refresh(&self, force_refresh: bool) -> Result<AttachOutcome, FetchError> {
        let principal = self.principal.lock().await.clone();
        let Some(principal) = principal else {
            return Ok(self
                .subscriptions
                .attach(None, Arc::new(Vec::new()))
                .await);
        };
        let groups = self.directory.groups(&principal, force_refresh).await?;
        Ok(self.subscriptions.attach(Some(&principal), groups).await)
    }

    pub async fn stop(&self) {
        if let Some(principal) = self.principal.lock().await.take() {
            self.directory.invalidate(&principal).await;
            info!(principal = %principal, "notifier: stopped");
        }
        self.subscriptions.detach().await;
    }

    pub async fn active_groups(&self) -> Vec<GroupId> {
        self.subscriptions.active_groups().await
    }
}
