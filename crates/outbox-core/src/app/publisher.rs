//! Publisher - writes outbox records inside the caller's transaction.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{Message, Record, RecordId};
use crate::error::OutboxResult;
use crate::ports::{Clock, IdGenerator, OutboxStore, SystemClock, UlidGenerator};

/// Appends messages to the outbox.
///
/// The record shares the caller's transaction, so it becomes visible exactly
/// when (and if) the caller's business writes commit.
pub struct Publisher<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl<S> Clone for Publisher<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
        }
    }
}

impl<S: OutboxStore> Publisher<S> {
    /// System clock and ULID ids.
    pub fn new(store: Arc<S>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_providers(store, clock, ids)
    }

    pub fn with_providers(store: Arc<S>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, clock, ids }
    }

    /// Stage `message` in `tx`. On error the caller should roll `tx` back.
    pub async fn send(&self, message: Message, tx: &mut S::Tx) -> OutboxResult<RecordId> {
        let record = Record::new(self.ids.new_record_id(), message, self.clock.now());
        self.store.add_record_tx(&record, tx).await?;

        debug!(
            record_id = %record.id,
            topic = %record.message.topic(),
            key = %record.message.key(),
            "outbox record staged"
        );
        Ok(record.id)
    }
}
