//! InMemoryStore - in-process OutboxStore for tests and the demo binary.
//!
//! All records live behind one async mutex. Each trait method does its work
//! inside a single critical section, which is what makes `claim_batch` an
//! atomic compare-and-set on `state`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{LockId, Record, RecordId, RecordState};
use crate::error::StoreError;
use crate::observability::RecordCounts;
use crate::ports::{OutboxStore, RemovedRecords};

#[derive(Default)]
struct InMemoryStoreState {
    records: HashMap<RecordId, Record>,
}

impl InMemoryStoreState {
    fn ensure_absent(&self, id: RecordId) -> Result<(), StoreError> {
        if self.records.contains_key(&id) {
            return Err(StoreError::Persistence(format!(
                "duplicate record id {id}"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction. Staged records become visible on `commit`;
    /// dropping the transaction discards them.
    pub fn begin(&self) -> InMemoryTransaction {
        InMemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }
    }

    pub async fn get(&self, id: RecordId) -> Option<Record> {
        self.state.lock().await.records.get(&id).cloned()
    }

    /// Snapshot of every committed record, oldest first.
    pub async fn records(&self) -> Vec<Record> {
        let state = self.state.lock().await;
        let mut records: Vec<Record> = state.records.values().cloned().collect();
        records.sort_by_key(|r| (r.created_on, r.id));
        records
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn counts_by_state(&self) -> RecordCounts {
        let state = self.state.lock().await;
        let mut counts = RecordCounts::default();
        for record in state.records.values() {
            counts.add(record.state);
        }
        counts
    }
}

/// Transaction handle for `InMemoryStore`.
pub struct InMemoryTransaction {
    state: Arc<Mutex<InMemoryStoreState>>,
    staged: Vec<Record>,
}

impl InMemoryTransaction {
    /// Apply every staged record at once. Fails without writing anything if
    /// any id already exists.
    pub async fn commit(self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for record in &self.staged {
            state.ensure_absent(record.id)?;
        }
        for record in self.staged {
            state.records.insert(record.id, record);
        }
        Ok(())
    }

    pub fn rollback(self) {}

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn add_record_tx(&self, record: &Record, tx: &mut Self::Tx) -> Result<(), StoreError> {
        if !Arc::ptr_eq(&self.state, &tx.state) {
            return Err(StoreError::Persistence(
                "transaction was opened on a different store".to_string(),
            ));
        }
        record.ensure_new()?;
        if tx.staged.iter().any(|staged| staged.id == record.id) {
            return Err(StoreError::Persistence(format!(
                "duplicate record id {}",
                record.id
            )));
        }
        self.state.lock().await.ensure_absent(record.id)?;
        tx.staged.push(record.clone());
        Ok(())
    }

    async fn claim_batch(
        &self,
        limit: usize,
        lock_id: LockId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut state = self.state.lock().await;

        let mut candidates: Vec<(DateTime<Utc>, RecordId)> = state
            .records
            .values()
            .filter(|r| r.state.is_claimable())
            .map(|r| (r.created_on, r.id))
            .collect();
        candidates.sort_unstable();
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if let Some(record) = state.records.get_mut(&id) {
                record.lock(lock_id, now)?;
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_processed(&self, id: RecordId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        record.mark_processed(now)
    }

    async fn clear_locks_with_duration_before_date(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut reclaimed = 0;
        for record in state.records.values_mut() {
            if record.is_lock_stale(cutoff) {
                record.unlock()?;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn remove_records_before_datetime(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<RemovedRecords, StoreError> {
        let mut state = self.state.lock().await;
        let mut removed = RemovedRecords::default();
        state.records.retain(|_, record| {
            if record.created_on >= cutoff {
                return true;
            }
            if record.state == RecordState::Processed {
                removed.processed += 1;
            } else {
                removed.undelivered += 1;
            }
            false
        });
        Ok(removed)
    }
}
