//! RuntimeBuilder - wires store, broker and providers into running loops.
//!
//! Configuration is validated before anything is spawned, so a runtime that
//! starts is one whose retention window outlasts its lock window.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use super::{Dispatcher, OutboxRuntime, RecordCleaner, RecordUnlocker};
use crate::config::OutboxConfig;
use crate::error::OutboxResult;
use crate::ports::{Clock, IdGenerator, MessageBroker, OutboxStore, SystemClock, UlidGenerator};

/// # Example
/// ```ignore
/// let runtime = RuntimeBuilder::new(store, broker)
///     .config(OutboxConfig::default())
///     .dispatchers(4)
///     .spawn()?;
/// // ...
/// runtime.shutdown_and_join().await;
/// ```
pub struct RuntimeBuilder<S, B: ?Sized> {
    store: Arc<S>,
    broker: Arc<B>,
    config: OutboxConfig,
    dispatchers: usize,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl<S, B> RuntimeBuilder<S, B>
where
    S: OutboxStore + 'static,
    B: MessageBroker + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, broker: Arc<B>) -> Self {
        Self {
            store,
            broker,
            config: OutboxConfig::default(),
            dispatchers: 1,
            clock: None,
            ids: None,
        }
    }

    pub fn config(mut self, config: OutboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of concurrent dispatcher loops. Zero runs only the sweepers.
    pub fn dispatchers(mut self, n: usize) -> Self {
        self.dispatchers = n;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validate the configuration and spawn every loop on the current
    /// tokio runtime.
    pub fn spawn(self) -> OutboxResult<OutboxRuntime> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::with_capacity(self.dispatchers + 2);

        for _ in 0..self.dispatchers {
            let dispatcher = Dispatcher::new(
                Arc::clone(&self.store),
                Arc::clone(&self.broker),
                Arc::clone(&clock),
                Arc::clone(&ids),
            )
            .with_batch_size(self.config.claim_batch_size)
            .with_poll_interval(self.config.poll_interval);
            let rx = shutdown_rx.clone();
            joins.push(("dispatcher", tokio::spawn(async move { dispatcher.run(rx).await })));
        }

        let unlocker = RecordUnlocker::new(
            Arc::clone(&self.store),
            Arc::clone(&clock),
            self.config.max_lock_duration,
        );
        let interval = self.config.unlock_interval;
        let rx = shutdown_rx.clone();
        joins.push(("unlocker", tokio::spawn(async move { unlocker.run(interval, rx).await })));

        let cleaner = RecordCleaner::new(
            Arc::clone(&self.store),
            clock,
            self.config.max_record_lifetime,
        );
        let interval = self.config.cleanup_interval;
        joins.push((
            "cleaner",
            tokio::spawn(async move { cleaner.run(interval, shutdown_rx).await }),
        ));

        info!(dispatchers = self.dispatchers, "outbox runtime started");
        Ok(OutboxRuntime::new(shutdown_tx, joins))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::app::Publisher;
    use crate::domain::{Message, RecordState};
    use crate::error::{ConfigError, OutboxError};
    use crate::impls::{InMemoryBroker, InMemoryStore};

    fn fast_config() -> OutboxConfig {
        OutboxConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_unlock_interval(Duration::from_millis(20))
            .with_cleanup_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn invalid_config_spawns_nothing() {
        let result = RuntimeBuilder::new(Arc::new(InMemoryStore::new()), Arc::new(InMemoryBroker::new()))
            .config(OutboxConfig::default().with_claim_batch_size(0))
            .spawn();

        assert!(matches!(
            result,
            Err(OutboxError::Config(ConfigError::Zero("claim_batch_size")))
        ));
    }

    #[tokio::test]
    async fn spawned_runtime_delivers_and_shuts_down() {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let runtime = RuntimeBuilder::new(Arc::clone(&store), Arc::clone(&broker))
            .config(fast_config())
            .dispatchers(3)
            .spawn()
            .unwrap();
        assert_eq!(runtime.task_count(), 5);

        let publisher = Publisher::new(Arc::clone(&store));
        let mut tx = store.begin();
        for n in 0..20 {
            publisher
                .send(Message::new("orders", n.to_string(), vec![n as u8]), &mut tx)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.counts_by_state().await.processed < 20 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), runtime.shutdown_and_join())
            .await
            .unwrap();

        assert_eq!(broker.delivered().await.len(), 20);
        assert!(store
            .records()
            .await
            .iter()
            .all(|r| r.state == RecordState::Processed));
    }

    #[tokio::test]
    async fn dynamic_broker_is_accepted() {
        let store = Arc::new(InMemoryStore::new());
        let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
        let runtime = RuntimeBuilder::new(store, broker)
            .config(fast_config())
            .dispatchers(0)
            .spawn()
            .unwrap();

        assert_eq!(runtime.task_count(), 2);
        runtime.shutdown_and_join().await;
    }
}
