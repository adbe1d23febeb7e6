//! Event channel framing.
//!
//! The channel is a durable, partitioned, at-least-once log. Producers get
//! the physical position back on success and an error with no automatic
//! retry on failure. Consumers receive each record once per group, but the
//! same record may be redelivered after a crash before commit, so handlers
//! must be idempotent.

pub mod kafka;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::ServiceError;

pub use kafka::{ConsumerLoop, KafkaPublisher};
pub use memory::InMemoryChannel;

/// Physical position a record was appended at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Appends records to the channel. One call, one append attempt.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str)
        -> Result<Delivery, ServiceError>;
}

/// Serializes `event` and appends it keyed by `key`.
pub async fn publish_event<T: serde::Serialize>(
    publisher: &dyn EventPublisher,
    topic: &str,
    key: &str,
    event: &T,
) -> Result<Delivery, ServiceError> {
    let payload =
        serde_json::to_string(event).map_err(|e| ServiceError::PublishFailed(e.to_string()))?;
    publisher.publish(topic, key, &payload).await
}

/// Processes one record. Implementations must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, key: Option<&str>, payload: &str) -> anyhow::Result<()>;
}

/// Retry schedule for a failing handler: `max_attempts` tries with
/// exponential backoff starting at `initial_backoff`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt)
    }
}

/// Dead-letter topic for records a handler could not process.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}.dlq")
}

/// Runs a handler against single records, retrying per [`RetryPolicy`] and
/// forwarding exhausted records to the dead-letter topic instead of
/// dropping them.
pub struct Dispatcher {
    handler: Arc<dyn EventHandler>,
    dead_letter: Arc<dyn EventPublisher>,
    source_topic: String,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        handler: Arc<dyn EventHandler>,
        dead_letter: Arc<dyn EventPublisher>,
        source_topic: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            handler,
            dead_letter,
            source_topic: source_topic.into(),
            policy,
        }
    }

    /// Returns `Ok` when the record was either handled or parked in the
    /// dead-letter topic. An `Err` means the record is in neither place and
    /// must not be committed.
    pub async fn dispatch(&self, key: Option<&str>, payload: &str) -> anyhow::Result<()> {
        let mut attempt = 0;
        loop {
            match self.handler.handle(key, payload).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt + 1 < self.policy.max_attempts => {
                    warn!(
                        topic = %self.source_topic,
                        attempt = attempt + 1,
                        "handler failed, retrying: {err:#}"
                    );
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        topic = %self.source_topic,
                        attempts = self.policy.max_attempts,
                        "handler exhausted retries: {err:#}"
                    );
                    let dlq = dead_letter_topic(&self.source_topic);
                    self.dead_letter
                        .publish(&dlq, key.unwrap_or(""), payload)
                        .await?;
                    warn!(topic = %dlq, "record parked in dead-letter topic");
                    return Ok(());
                }
            }
        }
    }
}
