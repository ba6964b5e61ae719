//! App - the outbox protocol built on top of the ports.
//!
//! # Components
//! - **Publisher**: stages a record in the caller's transaction
//! - **Dispatcher**: claim → send → ack loop
//! - **RecordUnlocker**: reclaims stale locks
//! - **RecordCleaner**: deletes records past retention
//! - **OutboxRuntime**: spawns all of the above with one shutdown switch

pub mod builder;
pub mod cleaner;
pub mod dispatcher;
pub mod publisher;
pub mod runtime;
pub mod unlocker;

pub use self::builder::RuntimeBuilder;
pub use self::cleaner::RecordCleaner;
pub use self::dispatcher::{DispatchReport, Dispatcher};
pub use self::publisher::Publisher;
pub use self::runtime::OutboxRuntime;
pub use self::unlocker::RecordUnlocker;

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;

/// `now - window`, saturating at the earliest representable instant.
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
    now.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Resolves once `true` is sent or the sender is dropped.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleep for `period` unless shutdown comes first. Returns `false` on shutdown.
pub(crate) async fn idle(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => false,
        _ = tokio::time::sleep(period) => true,
    }
}
