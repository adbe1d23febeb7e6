//! Background sweep for orders stranded in PENDING.
//!
//! A PENDING row older than the configured age means the stock reservation
//! failed, or the process died between the durable write and the confirm
//! transaction. Either way nothing will move it forward, so the sweep
//! cancels it. CONFIRMED and terminal orders are never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{error, warn};

use shared::OrderStatus;

use crate::store::OrderStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct PendingOrderReconciler {
    store: Arc<dyn OrderStore>,
    max_age: chrono::Duration,
}

impl PendingOrderReconciler {
    pub fn new(store: Arc<dyn OrderStore>, max_age: chrono::Duration) -> Self {
        Self { store, max_age }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(SWEEP_INTERVAL);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep().await {
                error!("error reconciling pending orders: {e:#}");
            }
        }
    }

    /// Cancels every PENDING order older than `max_age`. Returns how many
    /// orders were cancelled.
    pub async fn sweep(&self) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - self.max_age;
        let stale = self.store.stale_pending(cutoff).await?;
        let mut cancelled = 0;

        for order in stale {
            self.store
                .update_status(order.id, OrderStatus::Cancelled)
                .await?;
            warn!(
                "cancelled order {} stuck in PENDING since {}",
                order.id, order.created_at
            );
            cancelled += 1;
        }

        Ok(cancelled)
    }
}
