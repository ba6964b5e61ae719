//! Dispatcher - the claim → send → ack loop.
//!
//! # Flow
//! 1. Fresh `LockId` for this attempt
//! 2. `OutboxStore::claim_batch` locks up to `batch_size` pending records
//! 3. `MessageBroker::send` per record, in claim order
//! 4. Success → `OutboxStore::mark_processed`; failure → the record stays
//!    locked until `RecordUnlocker` reclaims it

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::idle;
use crate::domain::Record;
use crate::error::OutboxResult;
use crate::ports::{Clock, IdGenerator, MessageBroker, OutboxStore};

/// Outcome of one `dispatch_once` cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub delivered: usize,
    /// Broker refused; left locked for reclaim.
    pub failed: usize,
    /// Delivered, but `mark_processed` failed; will be redelivered.
    pub unacknowledged: usize,
}

pub struct Dispatcher<S, B: ?Sized> {
    store: Arc<S>,
    broker: Arc<B>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    batch_size: usize,
    poll_interval: Duration,
}

impl<S, B> Dispatcher<S, B>
where
    S: OutboxStore,
    B: MessageBroker + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        broker: Arc<B>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            broker,
            clock,
            ids,
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Claim one batch and try to deliver each record.
    ///
    /// Only a failed claim is returned as an error. Per-record failures are
    /// logged and counted so one bad record never holds up the rest.
    pub async fn dispatch_once(&self) -> OutboxResult<DispatchReport> {
        let lock_id = self.ids.new_lock_id();
        let records = self
            .store
            .claim_batch(self.batch_size, lock_id, self.clock.now())
            .await?;

        let mut report = DispatchReport {
            claimed: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return Ok(report);
        }
        debug!(lock_id = %lock_id, count = records.len(), "claimed outbox records");

        for record in &records {
            self.deliver(record, &mut report).await;
        }

        info!(
            lock_id = %lock_id,
            claimed = report.claimed,
            delivered = report.delivered,
            failed = report.failed,
            unacknowledged = report.unacknowledged,
            "dispatch cycle finished"
        );
        Ok(report)
    }

    async fn deliver(&self, record: &Record, report: &mut DispatchReport) {
        if let Err(err) = self.broker.send(&record.message).await {
            warn!(
                record_id = %record.id,
                error = %err,
                "delivery failed, record stays locked until reclaimed"
            );
            report.failed += 1;
            return;
        }

        match self.store.mark_processed(record.id, self.clock.now()).await {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                warn!(
                    record_id = %record.id,
                    error = %err,
                    "delivered but not marked processed, record will be redelivered"
                );
                report.unacknowledged += 1;
            }
        }
    }

    /// Dispatch until shutdown is requested. A cycle in progress always runs
    /// to completion; only the idle wait between cycles is interrupted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match self.dispatch_once().await {
                Ok(report) => report.claimed == 0,
                Err(err) => {
                    error!(error = %err, "claiming outbox records failed");
                    true
                }
            };

            if wait && !idle(self.poll_interval, &mut shutdown).await {
                break;
            }
        }

        info!("dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

    use super::*;
    use crate::app::Publisher;
    use crate::domain::{Message, RecordId, RecordState};
    use crate::impls::{InMemoryBroker, InMemoryStore};
    use crate::ports::{FixedClock, SequentialIdGenerator};

    struct Fixture {
        store: Arc<InMemoryStore>,
        broker: Arc<InMemoryBroker>,
        clock: FixedClock,
        publisher: Publisher<InMemoryStore>,
        dispatcher: Dispatcher<InMemoryStore, InMemoryBroker>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn fixture(batch_size: usize) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let clock = FixedClock::new(t0());
        let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIdGenerator::new());
        let publisher =
            Publisher::with_providers(Arc::clone(&store), Arc::new(clock.clone()), Arc::clone(&ids));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            Arc::new(clock.clone()),
            ids,
        )
        .with_batch_size(batch_size);
        Fixture {
            store,
            broker,
            clock,
            publisher,
            dispatcher,
        }
    }

    async fn publish(f: &Fixture, key: &str) -> RecordId {
        let mut tx = f.store.begin();
        let id = f
            .publisher
            .send(Message::new("orders", key, key.as_bytes().to_vec()), &mut tx)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        f.clock.advance(ChronoDuration::seconds(1));
        id
    }

    #[tokio::test]
    async fn empty_outbox_claims_nothing() {
        let f = fixture(10);
        let report = f.dispatcher.dispatch_once().await.unwrap();
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn delivers_in_creation_order_and_marks_processed() {
        let f = fixture(10);
        let a = publish(&f, "a").await;
        let b = publish(&f, "b").await;

        let report = f.dispatcher.dispatch_once().await.unwrap();

        assert_eq!(report.claimed, 2);
        assert_eq!(report.delivered, 2);
        let keys: Vec<String> = f
            .broker
            .delivered()
            .await
            .iter()
            .map(|m| m.key().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
        for id in [a, b] {
            let record = f.store.get(id).await.unwrap();
            assert_eq!(record.state, RecordState::Processed);
            assert_eq!(record.processed_on, Some(f.clock.now()));
        }
    }

    #[tokio::test]
    async fn batch_size_limits_each_cycle() {
        let f = fixture(2);
        for key in ["a", "b", "c"] {
            publish(&f, key).await;
        }

        assert_eq!(f.dispatcher.dispatch_once().await.unwrap().delivered, 2);
        assert_eq!(f.dispatcher.dispatch_once().await.unwrap().delivered, 1);
        assert_eq!(f.dispatcher.dispatch_once().await.unwrap().claimed, 0);
    }

    #[tokio::test]
    async fn failed_record_does_not_block_the_batch() {
        let f = fixture(10);
        let bad = publish(&f, "bad").await;
        let good = publish(&f, "good").await;
        f.broker.reject_key("bad").await;

        let report = f.dispatcher.dispatch_once().await.unwrap();

        assert_eq!(report.claimed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(f.store.get(bad).await.unwrap().state, RecordState::Locked);
        assert_eq!(f.store.get(good).await.unwrap().state, RecordState::Processed);

        // Still locked, so not claimable again until reclaimed.
        assert_eq!(f.dispatcher.dispatch_once().await.unwrap().claimed, 0);
    }

    #[tokio::test]
    async fn each_cycle_uses_a_fresh_lock_id() {
        let f = fixture(1);
        let a = publish(&f, "a").await;
        let b = publish(&f, "b").await;
        f.broker.set_unavailable(true);

        f.dispatcher.dispatch_once().await.unwrap();
        f.dispatcher.dispatch_once().await.unwrap();

        let lock_a = f.store.get(a).await.unwrap().lock_id;
        let lock_b = f.store.get(b).await.unwrap().lock_id;
        assert!(lock_a.is_some() && lock_b.is_some());
        assert_ne!(lock_a, lock_b);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_after_draining() {
        let f = fixture(10);
        publish(&f, "a").await;
        let (tx, rx) = watch::channel(false);
        let dispatcher = f.dispatcher.with_poll_interval(Duration::from_millis(10));

        let handle = tokio::spawn(async move { dispatcher.run(rx).await });
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.store.counts_by_state().await.processed == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.broker.delivered().await.len(), 1);
    }

    #[tokio::test]
    async fn dropping_the_sender_also_stops_run() {
        let f = fixture(10);
        let (tx, rx) = watch::channel(false);
        let dispatcher = f.dispatcher.with_poll_interval(Duration::from_secs(60));

        let handle = tokio::spawn(async move { dispatcher.run(rx).await });
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
