//! Impls - concrete adapters for the ports.
//!
//! - **InMemoryStore** / **InMemoryBroker** / **LogBroker**: always built,
//!   used by tests and the demo binary
//! - **PostgresStore**: cargo feature `postgres`
//! - **KafkaBroker**: cargo feature `kafka`

pub mod inmem_broker;
pub mod inmem_store;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use self::inmem_broker::{InMemoryBroker, LogBroker};
pub use self::inmem_store::{InMemoryStore, InMemoryTransaction};
#[cfg(feature = "kafka")]
pub use self::kafka::KafkaBroker;
#[cfg(feature = "postgres")]
pub use self::postgres::PostgresStore;
