//! Runtime configuration for the dispatcher and the two sweepers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Timing and batching knobs.
///
/// Durations (de)serialize as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// How long a claim may be held before the unlocker reclaims it.
    #[serde(with = "millis")]
    pub max_lock_duration: Duration,

    /// Retention before the cleaner deletes a record, delivered or not.
    #[serde(with = "millis")]
    pub max_record_lifetime: Duration,

    pub claim_batch_size: usize,

    /// Dispatcher back-off when a claim comes back empty.
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    #[serde(with = "millis")]
    pub unlock_interval: Duration,

    #[serde(with = "millis")]
    pub cleanup_interval: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_lock_duration: Duration::from_secs(5 * 60),
            max_record_lifetime: Duration::from_secs(7 * 24 * 60 * 60),
            claim_batch_size: 100,
            poll_interval: Duration::from_secs(1),
            unlock_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl OutboxConfig {
    pub fn with_max_lock_duration(mut self, d: Duration) -> Self {
        self.max_lock_duration = d;
        self
    }

    pub fn with_max_record_lifetime(mut self, d: Duration) -> Self {
        self.max_record_lifetime = d;
        self
    }

    pub fn with_claim_batch_size(mut self, size: usize) -> Self {
        self.claim_batch_size = size;
        self
    }

    pub fn with_poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    pub fn with_unlock_interval(mut self, d: Duration) -> Self {
        self.unlock_interval = d;
        self
    }

    pub fn with_cleanup_interval(mut self, d: Duration) -> Self {
        self.cleanup_interval = d;
        self
    }

    /// Reject settings under which a record could be deleted while still
    /// eligible for reclaim, or a stale lock could outlive several sweeps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.claim_batch_size == 0 {
            return Err(ConfigError::Zero("claim_batch_size"));
        }
        for (name, value) in [
            ("max_lock_duration", self.max_lock_duration),
            ("max_record_lifetime", self.max_record_lifetime),
            ("poll_interval", self.poll_interval),
            ("unlock_interval", self.unlock_interval),
            ("cleanup_interval", self.cleanup_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.max_record_lifetime <= self.max_lock_duration {
            return Err(ConfigError::LifetimeNotAboveLock {
                lifetime: self.max_record_lifetime,
                lock: self.max_lock_duration,
            });
        }
        if self.unlock_interval >= self.max_lock_duration {
            return Err(ConfigError::UnlockIntervalTooLong {
                interval: self.unlock_interval,
                lock: self.max_lock_duration,
            });
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
