//! Message: the payload an outbox record delivers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Payload handed to the broker.
///
/// Immutable after construction: fields are private and only `with_header`
/// (consuming `self`) can add headers while building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    key: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    topic: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            headers: HashMap::new(),
            body: body.into(),
            topic: topic.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Partitioning key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Destination topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
