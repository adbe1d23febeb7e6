//! The order orchestrator: synchronous pre-checks, the durable PENDING
//! write, stock reservation, and the CONFIRMED-plus-outbox commit.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;
use serde::Deserialize;
use tracing::{info, warn};

use shared::{OrderPlaced, OrderStatus, ServiceError};

use crate::clients::{IdentityVerifier, StockLedger};
use crate::models::{NewOrder, Order};
use crate::store::OrderStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrder {
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
}

pub struct OrderOrchestrator {
    store: Arc<dyn OrderStore>,
    identity: Arc<dyn IdentityVerifier>,
    stock: Arc<dyn StockLedger>,
}

impl OrderOrchestrator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        identity: Arc<dyn IdentityVerifier>,
        stock: Arc<dyn StockLedger>,
    ) -> Self {
        Self {
            store,
            identity,
            stock,
        }
    }

    /// Runs the placement saga. The caller gets the CONFIRMED order back as
    /// soon as the confirm transaction commits; publishing the OrderPlaced
    /// fact is the outbox relay's job.
    pub async fn place_order(&self, request: PlaceOrder) -> Result<Order, ServiceError> {
        info!(
            "creating order for user {} and product {}",
            request.user_id, request.product_id
        );

        if request.quantity <= 0 {
            return Err(ServiceError::InvalidInput(
                "quantity must be a positive integer".to_string(),
            ));
        }

        self.identity.verify_user(request.user_id).await?;

        let product = self.stock.product(request.product_id).await?;

        let available = self
            .stock
            .check_stock(request.product_id, request.quantity)
            .await?;
        if !available {
            return Err(ServiceError::InsufficientStock(product.name));
        }

        let total_amount = &product.price * BigDecimal::from(request.quantity);

        // Durability point: the order id exists from here on, whatever
        // happens to the reservation.
        let order = self
            .store
            .insert(NewOrder {
                user_id: request.user_id,
                product_id: request.product_id,
                quantity: request.quantity,
                total_amount: total_amount.clone(),
                status: OrderStatus::Pending,
            })
            .await?;

        if let Err(e) = self.stock.reserve(request.product_id, request.quantity).await {
            // The PENDING row stays behind; the reconciler sweeps it up.
            warn!("stock reservation failed for order {}: {}", order.id, e);
            return Err(ServiceError::StockReservationFailed(e.to_string()));
        }

        let event = OrderPlaced {
            order_id: order.id,
            user_id: order.user_id,
            product_id: order.product_id,
            amount: total_amount.to_f64().unwrap_or_default(),
            quantity: order.quantity,
        };
        let order = self.store.confirm_with_outbox(order.id, &event).await?;

        info!("order created successfully with id {}", order.id);
        Ok(order)
    }

    pub async fn get_order(&self, id: i64) -> Result<Order, ServiceError> {
        self.store.get(id).await?.ok_or(ServiceError::NotFound {
            resource: "Order",
            key: id.to_string(),
        })
    }

    pub async fn orders_by_user(&self, user_id: i64) -> Result<Vec<Order>, ServiceError> {
        self.store.by_user(user_id).await
    }

    pub async fn all_orders(&self) -> Result<Vec<Order>, ServiceError> {
        self.store.all().await
    }

    pub async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
    ) -> Result<Order, ServiceError> {
        info!("updating order {} status to {}", id, status);
        self.store.update_status(id, status).await
    }

    pub async fn cancel_order(&self, id: i64) -> Result<Order, ServiceError> {
        info!("cancelling order {}", id);
        let order = self.get_order(id).await?;
        if order.status.is_terminal() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "cannot cancel order in {} status",
                order.status
            )));
        }
        self.store.update_status(id, OrderStatus::Cancelled).await
    }
}
