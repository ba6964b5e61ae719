//! IdGenerator port: unique ids for records and lock tokens.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

use crate::domain::{LockId, RecordId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn new_record_id(&self) -> RecordId;

    /// One per dispatch attempt.
    fn new_lock_id(&self) -> LockId;
}

/// ULID ids: the timestamp part comes from the injected clock, the rest is
/// random, so ids stay unique even under a `FixedClock`.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn new_record_id(&self) -> RecordId {
        RecordId::from(self.next())
    }

    fn new_lock_id(&self) -> LockId {
        LockId::from(self.next())
    }
}

/// Deterministic generator for tests: 1, 2, 3, ... shared across id kinds.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> Ulid {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        Ulid(u128::from(n))
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn new_record_id(&self) -> RecordId {
        RecordId::from(self.next())
    }

    fn new_lock_id(&self) -> LockId {
        LockId::from(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));

        let id1 = id_gen.new_record_id();
        let id2 = id_gen.new_record_id();

        assert_ne!(id1, id2);
        assert_ne!(id_gen.new_lock_id(), id_gen.new_lock_id());
    }

    #[test]
    fn ulid_generator_takes_timestamp_from_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id1 = id_gen.new_record_id();
        let id2 = id_gen.new_record_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn sequential_generator_counts_up() {
        let id_gen = SequentialIdGenerator::new();

        assert_eq!(id_gen.new_record_id().as_ulid(), Ulid(1));
        assert_eq!(id_gen.new_lock_id().as_ulid(), Ulid(2));
        assert_eq!(id_gen.new_record_id().as_ulid(), Ulid(3));
    }
}
