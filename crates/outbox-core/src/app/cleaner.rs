//! RecordCleaner - deletes records older than `max_record_lifetime`.
//!
//! Records are removed whatever their state. Undelivered ones are the
//! accepted data-loss boundary of the outbox and are logged at `warn`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{shutdown_requested, window_start};
use crate::error::{OutboxError, OutboxResult};
use crate::ports::{Clock, OutboxStore, RemovedRecords};

pub struct RecordCleaner<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    max_record_lifetime: Duration,
}

impl<S: OutboxStore> RecordCleaner<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, max_record_lifetime: Duration) -> Self {
        Self {
            store,
            clock,
            max_record_lifetime,
        }
    }

    pub async fn remove_expired_messages(&self) -> OutboxResult<RemovedRecords> {
        let expiry = window_start(self.clock.now(), self.max_record_lifetime);
        let removed = self
            .store
            .remove_records_before_datetime(expiry)
            .await
            .map_err(OutboxError::Cleanup)?;

        if removed.undelivered > 0 {
            warn!(
                count = removed.undelivered,
                expiry = %expiry,
                "removed outbox records that were never delivered"
            );
        }
        if removed.processed > 0 {
            info!(count = removed.processed, expiry = %expiry, "removed processed outbox records");
        }
        if removed.total() == 0 {
            debug!(expiry = %expiry, "no expired outbox records");
        }
        Ok(removed)
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = interval.as_millis() as u64,
            max_record_lifetime_ms = self.max_record_lifetime.as_millis() as u64,
            "record cleaner started"
        );

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.remove_expired_messages().await {
                error!(error = %err, "expired record sweep failed");
            }
        }

        info!("record cleaner stopped");
    }
}
