//! The payment processor: settles OrderPlaced facts exactly once per order,
//! serves the direct payment API, and owns the refund state machine.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use num_traits::Signed;
use serde::Deserialize;
use tracing::{error, info, warn};

use shared::channel::{publish_event, EventPublisher};
use shared::{OrderPlaced, PaymentSettled, PaymentStatus, ServiceError};

use crate::gateway::{SettlementGateway, SettlementOutcome};
use crate::models::{NewPayment, Payment};
use crate::store::{InsertPaymentError, PaymentStore};

/// Payment method recorded for event-driven settlements, where the caller
/// never stated one.
const DEFAULT_PAYMENT_METHOD: &str = "CARD";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: i64,
    pub amount: BigDecimal,
    pub payment_method: String,
}

pub struct PaymentProcessor {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn SettlementGateway>,
    publisher: Arc<dyn EventPublisher>,
    settled_topic: String,
}

impl PaymentProcessor {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn SettlementGateway>,
        publisher: Arc<dyn EventPublisher>,
        settled_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            publisher,
            settled_topic: settled_topic.into(),
        }
    }

    fn settle(&self, order_id: i64, amount: &BigDecimal) -> (PaymentStatus, Option<String>, String) {
        match self.gateway.settle(order_id, amount) {
            SettlementOutcome::Approved { transaction_id } => (
                PaymentStatus::Success,
                Some(transaction_id),
                "Payment processed successfully".to_string(),
            ),
            SettlementOutcome::Declined { reason } => {
                (PaymentStatus::Failed, None, format!("Payment failed: {reason}"))
            }
        }
    }

    /// Event-driven entry point. Idempotent: a replayed delivery for an
    /// order that already has a payment is a no-op, whether it loses to the
    /// pre-check or to the store's uniqueness constraint.
    pub async fn process_order_payment(&self, event: &OrderPlaced) -> Result<(), ServiceError> {
        info!(
            "processing payment for order {} amount {}",
            event.order_id, event.amount
        );

        if self.store.by_order(event.order_id).await?.is_some() {
            warn!("payment already exists for order id: {}", event.order_id);
            return Ok(());
        }

        let amount = BigDecimal::try_from(event.amount)
            .map_err(|e| ServiceError::InvalidInput(format!("bad amount: {e}")))?;
        let (status, transaction_id, remarks) = self.settle(event.order_id, &amount);

        let payment = match self
            .store
            .insert(NewPayment {
                order_id: event.order_id,
                amount,
                status,
                transaction_id,
                payment_method: DEFAULT_PAYMENT_METHOD.to_string(),
                remarks,
            })
            .await
        {
            Ok(payment) => payment,
            Err(InsertPaymentError::DuplicateOrder(order_id)) => {
                // Lost the race against a concurrent duplicate delivery.
                warn!("payment already exists for order id: {}", order_id);
                return Ok(());
            }
            Err(InsertPaymentError::Store(e)) => return Err(e),
        };

        info!(
            "payment {} for order {} with transaction id {:?}",
            payment.status, payment.order_id, payment.transaction_id
        );

        let settled = PaymentSettled {
            order_id: payment.order_id,
            status: payment.status.to_string(),
            transaction_id: payment.transaction_id.clone(),
        };
        if let Err(e) =
            publish_event(self.publisher.as_ref(), &self.settled_topic, &settled.key(), &settled)
                .await
        {
            // The payment row is committed; the fact has no consumer yet.
            error!(
                "failed to publish payment-settled event for order {}: {}",
                payment.order_id, e
            );
        }

        Ok(())
    }

    /// Direct entry point. Same settlement rules as the event path, but an
    /// existing payment is a synchronous error instead of a no-op.
    pub async fn process_payment(&self, request: PaymentRequest) -> Result<Payment, ServiceError> {
        info!("processing payment for order id: {}", request.order_id);

        if !request.amount.is_positive() {
            return Err(ServiceError::InvalidInput(
                "amount must be positive".to_string(),
            ));
        }
        if self.store.by_order(request.order_id).await?.is_some() {
            return Err(ServiceError::DuplicatePayment(request.order_id));
        }

        let (status, transaction_id, remarks) = self.settle(request.order_id, &request.amount);

        match self
            .store
            .insert(NewPayment {
                order_id: request.order_id,
                amount: request.amount,
                status,
                transaction_id,
                payment_method: request.payment_method,
                remarks,
            })
            .await
        {
            Ok(payment) => Ok(payment),
            Err(InsertPaymentError::DuplicateOrder(order_id)) => {
                Err(ServiceError::DuplicatePayment(order_id))
            }
            Err(InsertPaymentError::Store(e)) => Err(e),
        }
    }

    /// Refunds are legal from SUCCESS only; REFUNDED is terminal.
    pub async fn refund_payment(&self, payment_id: i64) -> Result<Payment, ServiceError> {
        info!("processing refund for payment id: {}", payment_id);

        let payment = self.payment_by_id(payment_id).await?;
        match payment.status {
            PaymentStatus::Success => {
                self.store
                    .update_status(
                        payment_id,
                        PaymentStatus::Refunded,
                        "Payment refunded successfully",
                    )
                    .await
            }
            PaymentStatus::Refunded => Err(ServiceError::InvalidStateTransition(
                "payment already refunded".to_string(),
            )),
            PaymentStatus::Failed => Err(ServiceError::InvalidStateTransition(
                "only successful payments can be refunded".to_string(),
            )),
        }
    }

    pub async fn payment_by_id(&self, id: i64) -> Result<Payment, ServiceError> {
        self.store.get(id).await?.ok_or(ServiceError::NotFound {
            resource: "Payment",
            key: id.to_string(),
        })
    }

    pub async fn payment_by_order(&self, order_id: i64) -> Result<Payment, ServiceError> {
        self.store
            .by_order(order_id)
            .await?
            .ok_or(ServiceError::NotFound {
                resource: "Payment",
                key: order_id.to_string(),
            })
    }

    pub async fn all_payments(&self) -> Result<Vec<Payment>, ServiceError> {
        self.store.all().await
    }

    pub async fn payments_by_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<Payment>, ServiceError> {
        self.store.by_status(status).await
    }
}
