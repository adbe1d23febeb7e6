//! Outbox relay: moves committed OrderPlaced facts from the store onto the
//! event channel. Rows are marked processed only after the broker
//! acknowledges the append, so a failed publish is retried on the next
//! sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{error, info};

use shared::channel::EventPublisher;

use crate::store::OrderStore;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const BATCH_SIZE: i64 = 100;

pub struct OutboxRelay {
    store: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OrderStore>,
        publisher: Arc<dyn EventPublisher>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            topic: topic.into(),
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(POLL_INTERVAL);

        loop {
            interval.tick().await;

            if let Err(e) = self.drain().await {
                error!("error processing outbox events: {e:#}");
            }
        }
    }

    /// One sweep over the unpublished backlog. Returns how many records
    /// were acknowledged by the broker.
    pub async fn drain(&self) -> anyhow::Result<usize> {
        let events = self.store.unpublished_events(BATCH_SIZE).await?;
        let mut published = 0;

        for event in events {
            let payload = serde_json::to_string(&event.event_data)?;
            let key = event.aggregate_id.to_string();

            match self.publisher.publish(&self.topic, &key, &payload).await {
                Ok(delivery) => {
                    self.store.mark_published(event.id).await?;
                    info!(
                        "published outbox event {} at partition {} offset {}",
                        event.id, delivery.partition, delivery.offset
                    );
                    published += 1;
                }
                Err(e) => {
                    error!("failed to publish outbox event {}: {}", event.id, e);
                    continue;
                }
            }
        }

        Ok(published)
    }
}
