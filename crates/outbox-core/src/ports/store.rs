//! OutboxStore port: durable, transactional record persistence.
//!
//! Every method is atomic with respect to concurrent callers, including
//! callers in other processes. `claim_batch` is the race-critical one: two
//! concurrent claims must never return the same record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{LockId, Record, RecordId};
use crate::error::StoreError;

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovedRecords {
    pub processed: u64,
    /// Removed without ever being delivered.
    pub undelivered: u64,
}

impl RemovedRecords {
    pub fn total(&self) -> u64 {
        self.processed + self.undelivered
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Caller-owned transaction that also carries the business writes.
    type Tx: Send;

    /// Insert `record` as part of `tx`. Visible to other callers only once
    /// the caller commits `tx`.
    async fn add_record_tx(&self, record: &Record, tx: &mut Self::Tx) -> Result<(), StoreError>;

    /// Lock up to `limit` pending records, oldest `created_on` first, and
    /// return them in that order.
    async fn claim_batch(
        &self,
        limit: usize,
        lock_id: LockId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError>;

    /// `Locked -> Processed`.
    async fn mark_processed(&self, id: RecordId, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Reset every record locked before `cutoff` to pending. Returns how many
    /// were reclaimed.
    async fn clear_locks_with_duration_before_date(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Delete every record created before `cutoff`, whatever its state.
    async fn remove_records_before_datetime(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<RemovedRecords, StoreError>;
}
