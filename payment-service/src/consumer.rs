use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use shared::channel::EventHandler;
use shared::OrderPlaced;

use crate::processor::PaymentProcessor;

/// Decodes OrderPlaced records and hands them to the processor. Undecodable
/// payloads error out and end up in the dead-letter topic via the
/// dispatcher.
pub struct OrderPlacedHandler {
    processor: Arc<PaymentProcessor>,
}

impl OrderPlacedHandler {
    pub fn new(processor: Arc<PaymentProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl EventHandler for OrderPlacedHandler {
    async fn handle(&self, _key: Option<&str>, payload: &str) -> anyhow::Result<()> {
        let event: OrderPlaced = serde_json::from_str(payload)?;
        info!("received order-placed event for order {}", event.order_id);
        self.processor.process_order_payment(&event).await?;
        Ok(())
    }
}
