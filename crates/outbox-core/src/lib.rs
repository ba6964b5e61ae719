//! outbox-core
//!
//! Transactional outbox: messages are written to the same store as the
//! business data inside the caller's transaction, then delivered to a broker
//! by background dispatchers with at-least-once semantics.
//!
//! # Modules
//! - **domain**: ids, `Message`, `Record` and its state machine
//! - **ports**: `OutboxStore`, `MessageBroker`, `Clock`, `IdGenerator`
//! - **app**: `Publisher`, `Dispatcher`, `RecordUnlocker`, `RecordCleaner`,
//!   `RuntimeBuilder` / `OutboxRuntime`
//! - **impls**: in-memory store and brokers; Postgres and Kafka behind features
//! - **config**: `OutboxConfig`
//! - **error**: error enums shared by every layer
//!
//! # Record lifecycle
//! ```text
//! PendingDelivery --claim--> Locked --ack--> Processed
//!        ^                     |
//!        +------reclaim--------+
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{
    DispatchReport, Dispatcher, OutboxRuntime, Publisher, RecordCleaner, RecordUnlocker,
    RuntimeBuilder,
};
pub use config::OutboxConfig;
pub use domain::{LockId, Message, Record, RecordId, RecordState};
pub use error::{ConfigError, DeliveryError, OutboxError, OutboxResult, StoreError};
pub use observability::RecordCounts;
pub use ports::{Clock, IdGenerator, MessageBroker, OutboxStore, RemovedRecords};
