//! KafkaBroker - MessageBroker backed by an rdkafka `FutureProducer`.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::{debug, info};

use crate::domain::Message;
use crate::error::DeliveryError;
use crate::ports::MessageBroker;

/// Sends each message and waits for its delivery report, so `send` only
/// returns once the cluster acknowledged (or refused) the write.
pub struct KafkaBroker {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl KafkaBroker {
    /// `brokers` is a comma-separated bootstrap list.
    ///
    /// - `acks=all`: wait for all in-sync replicas
    /// - `enable.idempotence=true`: no producer-side duplicates on retry
    pub fn new(brokers: &str, queue_timeout: Duration) -> Result<Self, KafkaError> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "30000");
        Self::from_config(&config, queue_timeout)
    }

    pub fn from_config(config: &ClientConfig, queue_timeout: Duration) -> Result<Self, KafkaError> {
        let producer: FutureProducer = config.create()?;
        info!(queue_timeout_ms = queue_timeout.as_millis() as u64, "Kafka producer created");
        Ok(Self {
            producer,
            queue_timeout,
        })
    }
}

fn headers_of(message: &Message) -> OwnedHeaders {
    message
        .headers()
        .iter()
        .fold(OwnedHeaders::new(), |headers, (name, value)| {
            headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_bytes()),
            })
        })
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        let record = FutureRecord::to(message.topic())
            .key(message.key())
            .payload(message.body())
            .headers(headers_of(message));

        match self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
        {
            Ok((partition, offset)) => {
                debug!(
                    topic = %message.topic(),
                    key = %message.key(),
                    partition,
                    offset,
                    "Kafka delivery acknowledged"
                );
                Ok(())
            }
            Err((err, _)) => Err(DeliveryError::new(message.topic(), err.to_string())),
        }
    }
}
