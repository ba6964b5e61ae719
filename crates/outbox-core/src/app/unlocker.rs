//! RecordUnlocker - reclaims records whose claim outlived `max_lock_duration`.
//!
//! A dispatcher that crashes (or whose broker send failed) leaves its records
//! `Locked`. Once the lock is older than `max_lock_duration` they go back to
//! `PendingDelivery` and the next claim redelivers them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use super::{shutdown_requested, window_start};
use crate::error::{OutboxError, OutboxResult};
use crate::ports::{Clock, OutboxStore};

pub struct RecordUnlocker<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    max_lock_duration: Duration,
}

impl<S: OutboxStore> RecordUnlocker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, max_lock_duration: Duration) -> Self {
        Self {
            store,
            clock,
            max_lock_duration,
        }
    }

    /// Reset every lock acquired before `now - max_lock_duration`.
    /// Returns how many records were reclaimed.
    pub async fn unlock_expired_messages(&self) -> OutboxResult<u64> {
        let expiry = window_start(self.clock.now(), self.max_lock_duration);
        let reclaimed = self
            .store
            .clear_locks_with_duration_before_date(expiry)
            .await
            .map_err(OutboxError::Reclaim)?;

        if reclaimed > 0 {
            info!(count = reclaimed, expiry = %expiry, "reclaimed stale outbox locks");
        } else {
            debug!(expiry = %expiry, "no stale outbox locks");
        }
        Ok(reclaimed)
    }

    /// Sweep every `interval` until shutdown. A failed sweep is logged and
    /// retried on the next tick.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = interval.as_millis() as u64,
            max_lock_duration_ms = self.max_lock_duration.as_millis() as u64,
            "record unlocker started"
        );

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.unlock_expired_messages().await {
                error!(error = %err, "stale lock sweep failed");
            }
        }

        info!("record unlocker stopped");
    }
}
