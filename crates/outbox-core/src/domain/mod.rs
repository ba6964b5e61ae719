//! Domain model: ids, the message payload and the outbox record.

pub mod ids;
pub mod message;
pub mod record;

pub use ids::{LockId, RecordId};
pub use message::Message;
pub use record::{Record, RecordState};
