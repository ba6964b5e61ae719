//! outbox demo binary.
//!
//! Usage: outbox-cli [--messages <n>] [--run-secs <secs>] [--dispatchers <n>]
//!
//! Publishes a few messages through an in-memory store, one of them inside a
//! transaction that is rolled back, then runs the dispatchers and sweepers
//! until Ctrl-C or `--run-secs` elapses. Final record counts are printed to
//! stdout as JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use outbox_core::impls::{InMemoryStore, LogBroker};
use outbox_core::{Message, MessageBroker, OutboxConfig, Publisher, RuntimeBuilder};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "outbox-cli")]
#[command(about = "Transactional outbox demo: publish, dispatch, reclaim, clean up")]
struct Args {
    /// Seconds a claim may be held before it is reclaimed.
    #[arg(long, env = "OUTBOX_MAX_LOCK_SECS", default_value = "300")]
    max_lock_secs: u64,

    /// Seconds a record is retained before cleanup.
    #[arg(long, env = "OUTBOX_MAX_RECORD_LIFETIME_SECS", default_value = "604800")]
    max_record_lifetime_secs: u64,

    #[arg(long, env = "OUTBOX_CLAIM_BATCH_SIZE", default_value = "100")]
    claim_batch_size: usize,

    /// Dispatcher back-off in milliseconds when the outbox is empty.
    #[arg(long, env = "OUTBOX_POLL_MS", default_value = "1000")]
    poll_ms: u64,

    #[arg(long, env = "OUTBOX_UNLOCK_INTERVAL_SECS", default_value = "60")]
    unlock_interval_secs: u64,

    #[arg(long, env = "OUTBOX_CLEANUP_INTERVAL_SECS", default_value = "3600")]
    cleanup_interval_secs: u64,

    #[arg(long, env = "OUTBOX_DISPATCHERS", default_value = "2")]
    dispatchers: usize,

    /// Demo messages to publish on startup.
    #[arg(long, default_value = "10")]
    messages: usize,

    #[arg(long, default_value = "orders")]
    topic: String,

    /// Stop after this many seconds. 0 runs until Ctrl-C.
    #[arg(long, default_value = "5")]
    run_secs: u64,

    /// Kafka bootstrap servers. Messages are only logged when unset.
    #[cfg(feature = "kafka")]
    #[arg(long, env = "KAFKA_BROKERS")]
    kafka_brokers: Option<String>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> OutboxConfig {
        OutboxConfig::default()
            .with_max_lock_duration(Duration::from_secs(self.max_lock_secs))
            .with_max_record_lifetime(Duration::from_secs(self.max_record_lifetime_secs))
            .with_claim_batch_size(self.claim_batch_size)
            .with_poll_interval(Duration::from_millis(self.poll_ms))
            .with_unlock_interval(Duration::from_secs(self.unlock_interval_secs))
            .with_cleanup_interval(Duration::from_secs(self.cleanup_interval_secs))
    }

    #[cfg(feature = "kafka")]
    fn broker(&self) -> anyhow::Result<Arc<dyn MessageBroker>> {
        match &self.kafka_brokers {
            Some(brokers) => {
                let broker =
                    outbox_core::impls::KafkaBroker::new(brokers, Duration::from_secs(5))
                        .context("creating Kafka producer")?;
                Ok(Arc::new(broker))
            }
            None => Ok(Arc::new(LogBroker)),
        }
    }

    #[cfg(not(feature = "kafka"))]
    fn broker(&self) -> anyhow::Result<Arc<dyn MessageBroker>> {
        Ok(Arc::new(LogBroker))
    }
}

async fn publish_demo(
    publisher: &Publisher<InMemoryStore>,
    store: &InMemoryStore,
    topic: &str,
    count: usize,
) -> anyhow::Result<()> {
    for n in 0..count {
        let message = Message::new(topic, n.to_string(), format!("{{\"seq\":{n}}}").into_bytes())
            .with_header("source", "outbox-demo");
        let mut tx = store.begin();
        let id = publisher.send(message, &mut tx).await?;
        tx.commit().await?;
        info!(record_id = %id, seq = n, "published");
    }

    // Never visible to the dispatchers.
    let mut tx = store.begin();
    let id = publisher
        .send(Message::new(topic, "rolled-back", b"{}".to_vec()), &mut tx)
        .await?;
    tx.rollback();
    info!(record_id = %id, "published then rolled back");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = args.config();
    info!(
        max_lock_ms = config.max_lock_duration.as_millis() as u64,
        max_record_lifetime_ms = config.max_record_lifetime.as_millis() as u64,
        claim_batch_size = config.claim_batch_size,
        dispatchers = args.dispatchers,
        "configuration loaded"
    );

    let store = Arc::new(InMemoryStore::new());
    let runtime = RuntimeBuilder::new(Arc::clone(&store), args.broker()?)
        .config(config)
        .dispatchers(args.dispatchers)
        .spawn()
        .context("starting outbox runtime")?;

    let publisher = Publisher::new(Arc::clone(&store));
    publish_demo(&publisher, &store, &args.topic, args.messages).await?;

    if args.run_secs == 0 {
        tokio::signal::ctrl_c().await?;
        info!("received shutdown signal");
    } else {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.run_secs)) => {}
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("received shutdown signal");
            }
        }
    }

    runtime.shutdown_and_join().await;

    let counts = store.counts_by_state().await;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}
