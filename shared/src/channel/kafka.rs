//! Kafka bindings for the channel framing.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use tracing::error;

use super::{Delivery, Dispatcher, EventPublisher};
use crate::error::ServiceError;

/// [`EventPublisher`] backed by an rdkafka [`FutureProducer`].
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer) -> Self {
        Self {
            producer,
            timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<Delivery, ServiceError> {
        let record = FutureRecord::to(topic).payload(payload).key(key);
        let (partition, offset) = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| ServiceError::PublishFailed(format!("{topic}: {e}")))?;
        Ok(Delivery { partition, offset })
    }
}

/// Pulls records off a [`StreamConsumer`] and runs them through a
/// [`Dispatcher`], one record in flight per group member.
///
/// A record is committed once the dispatcher reports it handled or parked;
/// if the dispatcher fails (dead-letter publish failed) the record stays
/// uncommitted and will be redelivered.
pub struct ConsumerLoop {
    consumer: StreamConsumer,
    dispatcher: Dispatcher,
}

impl ConsumerLoop {
    pub fn new(consumer: StreamConsumer, dispatcher: Dispatcher) -> Self {
        Self {
            consumer,
            dispatcher,
        }
    }

    pub async fn run(self) {
        let mut message_stream = self.consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    let payload = match m.payload_view::<str>() {
                        Some(Ok(payload)) => payload,
                        Some(Err(e)) => {
                            error!("error parsing payload: {}", e);
                            continue;
                        }
                        None => continue,
                    };
                    let key = m.key().and_then(|k| std::str::from_utf8(k).ok());

                    if let Err(e) = self.dispatcher.dispatch(key, payload).await {
                        error!("record neither handled nor parked, leaving uncommitted: {e:#}");
                        continue;
                    }

                    if let Err(e) = self.consumer.commit_message(&m, CommitMode::Async) {
                        error!("error committing message: {}", e);
                    }
                }
                Err(e) => error!("error receiving message: {}", e),
            }
        }
    }
}
