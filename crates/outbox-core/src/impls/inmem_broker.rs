//! In-process brokers: one that records deliveries, one that only logs.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::Message;
use crate::error::DeliveryError;
use crate::ports::MessageBroker;

/// Keeps every accepted message in memory.
///
/// Failures can be injected for the whole broker (`set_unavailable`) or for
/// individual message keys (`reject_key`).
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    delivered: Arc<Mutex<Vec<Message>>>,
    rejected_keys: Arc<Mutex<HashSet<String>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn reject_key(&self, key: impl Into<String>) {
        self.rejected_keys.lock().await.insert(key.into());
    }

    pub async fn accept_key(&self, key: &str) {
        self.rejected_keys.lock().await.remove(key);
    }

    pub async fn delivered(&self) -> Vec<Message> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DeliveryError::new(message.topic(), "broker unavailable"));
        }
        if self.rejected_keys.lock().await.contains(message.key()) {
            return Err(DeliveryError::new(
                message.topic(),
                format!("key {} rejected", message.key()),
            ));
        }
        self.delivered.lock().await.push(message.clone());
        Ok(())
    }
}

/// Accepts everything and writes one log line per message.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBroker;

#[async_trait]
impl MessageBroker for LogBroker {
    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        info!(
            topic = %message.topic(),
            key = %message.key(),
            headers = ?message.headers(),
            body = %String::from_utf8_lossy(message.body()),
            "message delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_accepted_messages() {
        let broker = InMemoryBroker::new();
        let msg = Message::new("orders", "42", b"x".to_vec()).with_header("trace", "abc");

        broker.send(&msg).await.unwrap();

        assert_eq!(broker.delivered().await, vec![msg]);
    }

    #[tokio::test]
    async fn injected_failures_are_reported() {
        let broker = InMemoryBroker::new();
        let ok = Message::new("orders", "1", b"a".to_vec());
        let bad = Message::new("orders", "2", b"b".to_vec());

        broker.reject_key("2").await;
        assert!(broker.send(&ok).await.is_ok());
        let err = broker.send(&bad).await.unwrap_err();
        assert_eq!(err.topic, "orders");

        broker.set_unavailable(true);
        assert!(broker.send(&ok).await.is_err());

        broker.set_unavailable(false);
        broker.accept_key("2").await;
        assert!(broker.send(&bad).await.is_ok());
        assert_eq!(broker.delivered().await.len(), 2);
    }

    #[tokio::test]
    async fn log_broker_always_accepts() {
        let msg = Message::new("audit", "k", b"{}".to_vec());
        assert!(LogBroker.send(&msg).await.is_ok());
    }
}
