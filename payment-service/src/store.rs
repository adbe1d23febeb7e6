//! Payment persistence. The unique constraint on `order_id` is the
//! authoritative idempotency guard for replayed OrderPlaced deliveries, so
//! `insert` reports a uniqueness violation as a typed outcome rather than
//! an opaque error.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use thiserror::Error;
use tokio::sync::RwLock;

use shared::{PaymentStatus, ServiceError};

use crate::models::{NewPayment, NewPaymentRow, Payment, PaymentRow};
use crate::schema::payments;

pub type DbPool = Pool<AsyncPgConnection>;

/// Insert outcome distinguishing the duplicate-order race from real
/// failures.
#[derive(Debug, Error)]
pub enum InsertPaymentError {
    #[error("payment already exists for order id: {0}")]
    DuplicateOrder(i64),

    #[error(transparent)]
    Store(#[from] ServiceError),
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, new: NewPayment) -> Result<Payment, InsertPaymentError>;

    async fn get(&self, id: i64) -> Result<Option<Payment>, ServiceError>;

    async fn by_order(&self, order_id: i64) -> Result<Option<Payment>, ServiceError>;

    async fn all(&self) -> Result<Vec<Payment>, ServiceError>;

    async fn by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>, ServiceError>;

    async fn update_status(
        &self,
        id: i64,
        status: PaymentStatus,
        remarks: &str,
    ) -> Result<Payment, ServiceError>;
}

fn internal<E: std::error::Error + Send + Sync + 'static>(e: E) -> ServiceError {
    ServiceError::Internal(e.into())
}

fn payment_not_found(id: i64) -> ServiceError {
    ServiceError::NotFound {
        resource: "Payment",
        key: id.to_string(),
    }
}

fn collect_payments(rows: Vec<PaymentRow>) -> Result<Vec<Payment>, ServiceError> {
    rows.into_iter().map(Payment::try_from).collect()
}

pub struct PgPaymentStore {
    pool: DbPool,
}

impl PgPaymentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert(&self, new: NewPayment) -> Result<Payment, InsertPaymentError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let order_id = new.order_id;
        let row: PaymentRow = diesel::insert_into(payments::table)
            .values(NewPaymentRow::from(&new))
            .get_result(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    InsertPaymentError::DuplicateOrder(order_id)
                }
                other => InsertPaymentError::Store(internal(other)),
            })?;
        Ok(Payment::try_from(row)?)
    }

    async fn get(&self, id: i64) -> Result<Option<Payment>, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let row = payments::table
            .find(id)
            .first::<PaymentRow>(&mut conn)
            .await
            .optional()
            .map_err(internal)?;
        row.map(Payment::try_from).transpose()
    }

    async fn by_order(&self, order_id: i64) -> Result<Option<Payment>, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let row = payments::table
            .filter(payments::order_id.eq(order_id))
            .first::<PaymentRow>(&mut conn)
            .await
            .optional()
            .map_err(internal)?;
        row.map(Payment::try_from).transpose()
    }

    async fn all(&self) -> Result<Vec<Payment>, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let rows = payments::table
            .order(payments::id.asc())
            .load::<PaymentRow>(&mut conn)
            .await
            .map_err(internal)?;
        collect_payments(rows)
    }

    async fn by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let rows = payments::table
            .filter(payments::status.eq(status.to_string()))
            .order(payments::id.asc())
            .load::<PaymentRow>(&mut conn)
            .await
            .map_err(internal)?;
        collect_payments(rows)
    }

    async fn update_status(
        &self,
        id: i64,
        status: PaymentStatus,
        remarks: &str,
    ) -> Result<Payment, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let row: PaymentRow = diesel::update(payments::table.find(id))
            .set((
                payments::status.eq(status.to_string()),
                payments::remarks.eq(remarks),
            ))
            .get_result(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => payment_not_found(id),
                other => internal(other),
            })?;
        Payment::try_from(row)
    }
}

#[derive(Default)]
struct MemoryState {
    payments: BTreeMap<i64, Payment>,
    next_id: i64,
}

/// In-memory store with the same contract as [`PgPaymentStore`], including
/// the duplicate-order outcome.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, new: NewPayment) -> Result<Payment, InsertPaymentError> {
        let mut state = self.state.write().await;
        if state.payments.values().any(|p| p.order_id == new.order_id) {
            return Err(InsertPaymentError::DuplicateOrder(new.order_id));
        }
        state.next_id += 1;
        let payment = Payment {
            id: state.next_id,
            order_id: new.order_id,
            amount: new.amount,
            status: new.status,
            transaction_id: new.transaction_id,
            payment_method: new.payment_method,
            remarks: new.remarks,
            created_at: Utc::now(),
        };
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: i64) -> Result<Option<Payment>, ServiceError> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn by_order(&self, order_id: i64) -> Result<Option<Payment>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn all(&self) -> Result<Vec<Payment>, ServiceError> {
        Ok(self.state.read().await.payments.values().cloned().collect())
    }

    async fn by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: i64,
        status: PaymentStatus,
        remarks: &str,
    ) -> Result<Payment, ServiceError> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| payment_not_found(id))?;
        payment.status = status;
        payment.remarks = remarks.to_string();
        Ok(payment.clone())
    }
}

#[cfg(test)]
mod tests {
    use bigdecimal::BigDecimal;

    use super::*;

    fn successful_payment(order_id: i64) -> NewPayment {
        NewPayment {
            order_id,
            amount: BigDecimal::from(50),
            status: PaymentStatus::Success,
            transaction_id: Some("TXN-TEST".to_string()),
            payment_method: "CARD".to_string(),
            remarks: "Payment processed successfully".to_string(),
        }
    }

    #[tokio::test]
    async fn second_insert_for_the_same_order_reports_a_duplicate() {
        let store = InMemoryPaymentStore::new();
        store.insert(successful_payment(1)).await.unwrap();

        let err = store.insert(successful_payment(1)).await.unwrap_err();
        assert!(matches!(err, InsertPaymentError::DuplicateOrder(1)));
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn by_status_filters() {
        let store = InMemoryPaymentStore::new();
        store.insert(successful_payment(1)).await.unwrap();
        store
            .insert(NewPayment {
                status: PaymentStatus::Failed,
                transaction_id: None,
                ..successful_payment(2)
            })
            .await
            .unwrap();

        let success = store.by_status(PaymentStatus::Success).await.unwrap();
        assert_eq!(success.len(), 1);
        assert_eq!(success[0].order_id, 1);
        assert!(store
            .by_status(PaymentStatus::Refunded)
            .await
            .unwrap()
            .is_empty());
    }
}
