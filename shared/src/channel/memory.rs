//! In-memory event channel for tests.
//!
//! Provides the same publisher interface as the Kafka binding, records
//! every append, and drives subscribed handlers synchronously. Stored
//! records can be delivered again to exercise at-least-once behavior.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use super::{Delivery, EventHandler, EventPublisher};
use crate::error::ServiceError;

#[derive(Default)]
struct ChannelState {
    topics: HashMap<String, Vec<(String, String)>>,
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    failing: HashSet<String>,
}

/// Single-partition in-memory channel.
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    state: Arc<RwLock<ChannelState>>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for every record published to `topic`.
    pub async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        let mut state = self.state.write().await;
        state
            .handlers
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    /// All `(key, payload)` pairs appended to `topic`, in order.
    pub async fn records(&self, topic: &str) -> Vec<(String, String)> {
        let state = self.state.read().await;
        state.topics.get(topic).cloned().unwrap_or_default()
    }

    /// Makes publishes to `topic` fail, for error-path tests.
    pub async fn set_fail(&self, topic: &str, fail: bool) {
        let mut state = self.state.write().await;
        if fail {
            state.failing.insert(topic.to_string());
        } else {
            state.failing.remove(topic);
        }
    }

    /// Delivers an already-stored record to the topic's handlers again,
    /// simulating crash-induced redelivery.
    pub async fn redeliver(&self, topic: &str, offset: usize) -> anyhow::Result<()> {
        let (record, handlers) = {
            let state = self.state.read().await;
            let record = state
                .topics
                .get(topic)
                .and_then(|records| records.get(offset))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no record at {topic}:{offset}"))?;
            let handlers = state.handlers.get(topic).cloned().unwrap_or_default();
            (record, handlers)
        };
        for handler in handlers {
            handler.handle(Some(&record.0), &record.1).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for InMemoryChannel {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<Delivery, ServiceError> {
        let (offset, handlers) = {
            let mut state = self.state.write().await;
            if state.failing.contains(topic) {
                return Err(ServiceError::PublishFailed(format!(
                    "{topic}: broker unavailable"
                )));
            }
            let records = state.topics.entry(topic.to_string()).or_default();
            records.push((key.to_string(), payload.to_string()));
            let offset = (records.len() - 1) as i64;
            let handlers = state.handlers.get(topic).cloned().unwrap_or_default();
            (offset, handlers)
        };

        for handler in handlers {
            if let Err(e) = handler.handle(Some(key), payload).await {
                warn!(topic, "in-memory handler failed: {e:#}");
            }
        }

        Ok(Delivery {
            partition: 0,
            offset,
        })
    }
}
