use std::{collections::HashSet, sync::Arc};

use futures::StreamExt;
use shared::{
    domain::{GroupId, UserId},
    protocol::Group,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::NotificationDispatcher,
    pipeline::{PipelineScope, SnapshotOutcome},
    BackendService, StreamingStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    Unauthenticated,
    NoGroups,
    Unchanged,
    Subscribed { groups: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    ListenerEstablished {
        group_id: GroupId,
    },
    ListenerFailed {
        group_id: GroupId,
        error: String,
    },
    SnapshotHandled {
        group_id: GroupId,
        outcome: SnapshotOutcome,
    },
}

struct Listener {
    group_id: GroupId,
    task: JoinHandle<()>,
}

struct ActiveSession {
    principal: UserId,
    groups: Arc<Vec<Group>>,
    scope: Arc<PipelineScope>,
    listeners: Vec<Listener>,
}

impl ActiveSession {
    fn abort_listeners(&self) {
        for listener in &self.listeners {
            listener.task.abort();
        }
    }
}

/// Keeps exactly one realtime listener per group of the attached session.
///
/// Attaching a different group list (by `Arc` identity) or a different
/// principal replaces the whole session; detaching or dropping the manager
/// cancels every listener and releases the session's caches.
pub struct SubscriptionManager {
    store: Arc<dyn StreamingStore>,
    backend: Arc<dyn BackendService>,
    dispatcher: Arc<NotificationDispatcher>,
    session: Mutex<Option<ActiveSession>>,
    events: broadcast::Sender<PipelineEvent>,
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<dyn StreamingStore>,
        backend: Arc<dyn BackendService>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            store,
            backend,
            dispatcher,
            session: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub async fn attach(
        &self,
        principal: Option<&UserId>,
        groups: Arc<Vec<Group>>,
    ) -> AttachOutcome {
        let mut session = self.session.lock().await;

        if let (Some(active), Some(principal)) = (session.as_ref(), principal) {
            if Arc::ptr_eq(&active.groups, &groups) && &active.principal == principal {
                return AttachOutcome::Unchanged;
            }
        }

        if let Some(previous) = session.take() {
            Self::teardown(previous).await;
        }

        let Some(principal) = principal else {
            debug!("subscriptions: no authenticated principal, skipping");
            return AttachOutcome::Unauthenticated;
        };
        if groups.is_empty() {
            debug!(principal = %principal, "subscriptions: no groups to watch");
            return AttachOutcome::NoGroups;
        }

        let scope = Arc::new(PipelineScope::new(
            principal.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&self.dispatcher),
        ));

        let mut seen = HashSet::new();
        let listeners: Vec<Listener> = groups
            .iter()
            .filter(|group| seen.insert(group.group_id.clone()))
            .map(|group| Listener {
                group_id: group.group_id.clone(),
                task: self.spawn_listener(group.clone(), Arc::clone(&scope)),
            })
            .collect();

        info!(
            principal = %principal,
            groups = listeners.len(),
            "subscriptions: session attached"
        );
        let subscribed = listeners.len();
        *session = Some(ActiveSession {
            principal: principal.clone(),
            groups,
            scope,
            listeners,
        });

        AttachOutcome::Subscribed { groups: subscribed }
    }

    pub async fn detach(&self) {
        let previous = self.session.lock().await.take();
        if let Some(previous) = previous {
            Self::teardown(previous).await;
        }
    }

    pub async fn active_groups(&self) -> Vec<GroupId> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|active| {
                active
                    .listeners
                    .iter()
                    .map(|listener| listener.group_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn active_scope(&self) -> Option<Arc<PipelineScope>> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|active| Arc::clone(&active.scope))
    }

    async fn teardown(session: ActiveSession) {
        session.abort_listeners();
        session.scope.release().await;
        info!(
            principal = %session.principal,
            groups = session.listeners.len(),
            "subscriptions: session detached"
        );
    }

    fn spawn_listener(&self, group: Group, scope: Arc<PipelineScope>) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        tokio::spawn(async move {
            let group_id = group.group_id.clone();
            let mut snapshots = match store.subscribe(&group_id).await {
                Ok(stream) => {
                    info!(group_id = %group_id, "subscriptions: listener established");
                    let _ = events.send(PipelineEvent::ListenerEstablished {
                        group_id: group_id.clone(),
                    });
                    stream
                }
                Err(err) => {
                    error!(group_id = %group_id, "subscriptions: failed to establish listener: {err:#}");
                    let _ = events.send(PipelineEvent::ListenerFailed {
                        group_id,
                        error: format!("{err:#}"),
                    });
                    return;
                }
            };

            while let Some(snapshot) = snapshots.next().await {
                match snapshot {
                    Ok(messages) => {
                        let outcome = scope.handle_snapshot(&group, &messages).await;
                        if outcome == SnapshotOutcome::Released {
                            break;
                        }
                        let _ = events.send(PipelineEvent::SnapshotHandled {
                            group_id: group_id.clone(),
                            outcome,
                        });
                    }
                    Err(err) => {
                        warn!(group_id = %group_id, "subscriptions: listener error: {err:#}");
                        let _ = events.send(PipelineEvent::ListenerFailed {
                            group_id: group_id.clone(),
                            error: format!("{err:#}"),
                        });
                        break;
                    }
                }
            }
            debug!(group_id = %group_id, "subscriptions: listener closed");
        })
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if let Some(active) = self.session.get_mut().take() {
            active.abort_listeners();
            active.scope.mark_released();
        }
    }
}

#[cfg(test)]
#[path = "tests/subscriptions_tests.rs"]
mod tests;
