//! Outbox record and its state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LockId, Message, RecordId};
use crate::error::StoreError;

/// Delivery state of a record.
///
/// State transitions:
/// - PendingDelivery -> Locked -> Processed
/// - Locked -> PendingDelivery (stale lock reclaimed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Committed and waiting for a dispatcher.
    PendingDelivery,

    /// Claimed by one dispatch attempt.
    Locked,

    /// Delivered to the broker.
    Processed,
}

impl RecordState {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordState::PendingDelivery => "pending_delivery",
            RecordState::Locked => "locked",
            RecordState::Processed => "processed",
        }
    }

    /// Is this record eligible for `claim_batch`?
    pub fn is_claimable(self) -> bool {
        matches!(self, RecordState::PendingDelivery)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_delivery" => Ok(RecordState::PendingDelivery),
            "locked" => Ok(RecordState::Locked),
            "processed" => Ok(RecordState::Processed),
            other => Err(StoreError::Persistence(format!(
                "unknown record state {other:?}"
            ))),
        }
    }
}

/// Message plus delivery metadata.
///
/// Stores mutate records only through `lock`, `mark_processed` and `unlock`,
/// which keep the lock fields paired and `processed_on` tied to `Processed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub message: Message,
    pub state: RecordState,
    pub created_on: DateTime<Utc>,
    pub lock_id: Option<LockId>,
    pub locked_on: Option<DateTime<Utc>>,
    pub processed_on: Option<DateTime<Utc>>,
}

impl Record {
    /// New record, pending delivery, no lock.
    pub fn new(id: RecordId, message: Message, created_on: DateTime<Utc>) -> Self {
        Self {
            id,
            message,
            state: RecordState::PendingDelivery,
            created_on,
            lock_id: None,
            locked_on: None,
            processed_on: None,
        }
    }

    /// `locked_on` never precedes `created_on`, even when the caller's clock
    /// is behind the publisher's.
    pub fn lock(&mut self, lock_id: LockId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.expect_state(RecordState::PendingDelivery)?;
        self.state = RecordState::Locked;
        self.lock_id = Some(lock_id);
        self.locked_on = Some(now.max(self.created_on));
        Ok(())
    }

    /// Lock fields are kept for audit. `processed_on` never precedes
    /// `locked_on`.
    pub fn mark_processed(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.expect_state(RecordState::Locked)?;
        self.state = RecordState::Processed;
        self.processed_on = Some(now.max(self.locked_on.unwrap_or(self.created_on)));
        Ok(())
    }

    pub fn unlock(&mut self) -> Result<(), StoreError> {
        self.expect_state(RecordState::Locked)?;
        self.state = RecordState::PendingDelivery;
        self.lock_id = None;
        self.locked_on = None;
        Ok(())
    }

    /// Locked before `cutoff`, so eligible for reclaim.
    pub fn is_lock_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.state == RecordState::Locked && self.locked_on.is_some_and(|at| at < cutoff)
    }

    /// Accept only records as built by `Record::new`: pending, with no lock
    /// or processing metadata.
    pub fn ensure_new(&self) -> Result<(), StoreError> {
        self.expect_state(RecordState::PendingDelivery)?;
        if self.lock_id.is_some() || self.locked_on.is_some() || self.processed_on.is_some() {
            return Err(StoreError::Persistence(format!(
                "record {} is pending but carries lock or processing metadata",
                self.id
            )));
        }
        Ok(())
    }

    fn expect_state(&self, expected: RecordState) -> Result<(), StoreError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StoreError::InvalidState {
                id: self.id,
                expected,
                actual: self.state,
            })
        }
    }
}
