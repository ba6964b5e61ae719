//! Ports: the capabilities the outbox protocol depends on.
//!
//! - `OutboxStore`: durable record storage (Postgres, in-memory)
//! - `MessageBroker`: delivery sink (Kafka, in-memory)
//! - `Clock` / `IdGenerator`: injected so tests stay deterministic

pub mod broker;
pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::broker::MessageBroker;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, SequentialIdGenerator, UlidGenerator};
pub use self::store::{OutboxStore, RemovedRecords};
