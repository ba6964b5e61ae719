use serde::{Deserialize, Serialize};

use crate::domain::RecordState;

/// Number of records per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub pending_delivery: usize,
    pub locked: usize,
    pub processed: usize,
}

impl RecordCounts {
    pub fn add(&mut self, state: RecordState) {
        match state {
            RecordState::PendingDelivery => self.pending_delivery += 1,
            RecordState::Locked => self.locked += 1,
            RecordState::Processed => self.processed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending_delivery + self.locked + self.processed
    }
}
