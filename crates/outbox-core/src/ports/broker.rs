//! MessageBroker port: the external delivery sink.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Message;
use crate::error::DeliveryError;

/// Synchronous send: returns only once the broker accepted or rejected the
/// message.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<B: MessageBroker + ?Sized> MessageBroker for Arc<B> {
    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        (**self).send(message).await
    }
}
