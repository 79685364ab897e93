use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shared::{
    domain::{MessageId, UserId},
    protocol::{Group, MessageSnapshot},
};
use tracing::{debug, warn};

use crate::{
    dispatcher::{DispatchReport, NotificationDispatcher},
    ledger::DeliveryLedger,
    membership::MembershipResolver,
    BackendService,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Empty,
    AlreadyProcessed {
        message_id: MessageId,
    },
    OwnMessage {
        message_id: MessageId,
    },
    AlreadyRead {
        message_id: MessageId,
    },
    MembershipUnavailable {
        message_id: MessageId,
        reason: String,
    },
    Dispatched {
        message_id: MessageId,
        report: DispatchReport,
    },
    Released,
}

/// Per-session state of the fan-out pipeline: who we are, whom each group
/// contains, and which messages were already handled.
///
/// One scope lives exactly as long as one attached session. Work that
/// finishes after `release` leaves no trace in it.
pub struct PipelineScope {
    principal: UserId,
    membership: MembershipResolver,
    ledger: DeliveryLedger,
    dispatcher: Arc<NotificationDispatcher>,
    released: AtomicBool,
}

impl PipelineScope {
    pub fn new(
        principal: UserId,
        backend: Arc<dyn BackendService>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            principal,
            membership: MembershipResolver::new(backend),
            ledger: DeliveryLedger::new(),
            dispatcher,
            released: AtomicBool::new(false),
        }
    }

    pub fn principal(&self) -> &UserId {
        &self.principal
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn membership(&self) -> &MembershipResolver {
        &self.membership
    }

    pub fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    /// Evaluates the most recent message of one snapshot.
    ///
    /// Snapshots of the same group must be fed one at a time; the
    /// subscription listener for a group guarantees that.
    pub async fn handle_snapshot(
        &self,
        group: &Group,
        messages: &[MessageSnapshot],
    ) -> SnapshotOutcome {
        if self.is_released() {
            return SnapshotOutcome::Released;
        }
        let Some(message) = messages.last() else {
            return SnapshotOutcome::Empty;
        };
        let group_id = &group.group_id;
        let message_id = message.message_id.clone();

        if !self.ledger.should_process(group_id, &message_id).await {
            return SnapshotOutcome::AlreadyProcessed { message_id };
        }

        if message.is_sent_by(&self.principal) {
            self.ledger.mark_processed(group_id, &message_id).await;
            return SnapshotOutcome::OwnMessage { message_id };
        }
        if message.is_read_by(&self.principal) {
            self.ledger.mark_processed(group_id, &message_id).await;
            return SnapshotOutcome::AlreadyRead { message_id };
        }

        let members = match self
            .membership
            .resolve_members(group_id, &group.member_ids)
            .await
        {
            Ok(members) => members,
            Err(err) => {
                warn!(
                    group_id = %group_id,
                    message_id = %message_id,
                    "pipeline: membership resolution failed: {err}"
                );
                return SnapshotOutcome::MembershipUnavailable {
                    message_id,
                    reason: err.to_string(),
                };
            }
        };
        if self.is_released() {
            return SnapshotOutcome::Released;
        }

        let report = self.dispatcher.dispatch(message, &members).await;
        self.ledger.mark_processed(group_id, &message_id).await;
        debug!(
            group_id = %group_id,
            message_id = %message_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "pipeline: message evaluated"
        );

        SnapshotOutcome::Dispatched { message_id, report }
    }

    pub async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.membership.release().await;
        self.ledger.release().await;
    }

    pub(crate) fn mark_released(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "tests/pipeline_tests.rs"]
mod tests;
