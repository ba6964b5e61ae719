use thiserror::Error;

use crate::domain::{RecordId, RecordState};

/// Failures surfaced by an `OutboxStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store unavailable, invalid transaction, or a constraint violation.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("record not found: {0}")]
    NotFound(RecordId),

    #[error("record {id} is {actual}, expected {expected}")]
    InvalidState {
        id: RecordId,
        expected: RecordState,
        actual: RecordState,
    },
}

/// Broker send failure. The record stays locked until reclaimed.
#[derive(Debug, Error)]
#[error("delivery to topic={topic} failed: {reason}")]
pub struct DeliveryError {
    pub topic: String,
    pub reason: String,
}

impl DeliveryError {
    pub fn new(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("max_record_lifetime ({lifetime:?}) must exceed max_lock_duration ({lock:?})")]
    LifetimeNotAboveLock {
        lifetime: std::time::Duration,
        lock: std::time::Duration,
    },

    #[error("unlock_interval ({interval:?}) must be shorter than max_lock_duration ({lock:?})")]
    UnlockIntervalTooLong {
        interval: std::time::Duration,
        lock: std::time::Duration,
    },
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("reclaiming stale locks failed: {0}")]
    Reclaim(#[source] StoreError),

    #[error("removing expired records failed: {0}")]
    Cleanup(#[source] StoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type OutboxResult<T> = Result<T, OutboxError>;
