use std::collections::HashSet;

use shared::domain::{GroupId, MessageId};
use tokio::sync::Mutex;

#[derive(Default)]
struct LedgerState {
    processed: HashSet<(GroupId, MessageId)>,
    released: bool,
}

/// Messages already evaluated for notification during this session.
///
/// Entries are never removed individually. After `release` the ledger reports
/// nothing as processable and ignores further marks.
#[derive(Default)]
pub struct DeliveryLedger {
    state: Mutex<LedgerState>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn should_process(&self, group_id: &GroupId, message_id: &MessageId) -> bool {
        let state = self.state.lock().await;
        !state.released
            && !state
                .processed
                .contains(&(group_id.clone(), message_id.clone()))
    }

    pub async fn mark_processed(&self, group_id: &GroupId, message_id: &MessageId) {
        let mut state = self.state.lock().await;
        if state.released {
            return;
        }
        state
            .processed
            .insert((group_id.clone(), message_id.clone()));
    }

    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        state.released = true;
        state.processed.clear();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.processed.len()
    }
}
