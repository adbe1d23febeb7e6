//! Order persistence behind a store trait, with a Postgres implementation
//! for production and an in-memory one for tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tokio::sync::RwLock;
use uuid::Uuid;

use shared::{OrderPlaced, OrderStatus, ServiceError};

use crate::models::{NewOrder, NewOrderRow, NewOutboxRow, Order, OrderRow, OutboxRecord, OutboxRow};
use crate::schema::{orders, outbox_events};

pub type DbPool = Pool<AsyncPgConnection>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order row. This is the durability point of order
    /// placement: the id exists from here on regardless of later failures.
    async fn insert(&self, new: NewOrder) -> Result<Order, ServiceError>;

    async fn get(&self, id: i64) -> Result<Option<Order>, ServiceError>;

    async fn by_user(&self, user_id: i64) -> Result<Vec<Order>, ServiceError>;

    async fn all(&self) -> Result<Vec<Order>, ServiceError>;

    /// Unconditional status write.
    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, ServiceError>;

    /// Marks the order CONFIRMED and enqueues the OrderPlaced fact in the
    /// outbox within a single transaction.
    async fn confirm_with_outbox(
        &self,
        id: i64,
        event: &OrderPlaced,
    ) -> Result<Order, ServiceError>;

    /// PENDING orders created before `cutoff`.
    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, ServiceError>;

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxRecord>, ServiceError>;

    async fn mark_published(&self, event_id: Uuid) -> Result<(), ServiceError>;
}

fn internal<E: std::error::Error + Send + Sync + 'static>(e: E) -> ServiceError {
    ServiceError::Internal(e.into())
}

fn order_not_found(id: i64) -> ServiceError {
    ServiceError::NotFound {
        resource: "Order",
        key: id.to_string(),
    }
}

fn collect_orders(rows: Vec<OrderRow>) -> Result<Vec<Order>, ServiceError> {
    rows.into_iter().map(Order::try_from).collect()
}

pub struct PgOrderStore {
    pool: DbPool,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, new: NewOrder) -> Result<Order, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let row: OrderRow = diesel::insert_into(orders::table)
            .values(NewOrderRow::from(&new))
            .get_result(&mut conn)
            .await
            .map_err(internal)?;
        Order::try_from(row)
    }

    async fn get(&self, id: i64) -> Result<Option<Order>, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let row = orders::table
            .find(id)
            .first::<OrderRow>(&mut conn)
            .await
            .optional()
            .map_err(internal)?;
        row.map(Order::try_from).transpose()
    }

    async fn by_user(&self, user_id: i64) -> Result<Vec<Order>, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let rows = orders::table
            .filter(orders::user_id.eq(user_id))
            .order(orders::id.asc())
            .load::<OrderRow>(&mut conn)
            .await
            .map_err(internal)?;
        collect_orders(rows)
    }

    async fn all(&self) -> Result<Vec<Order>, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let rows = orders::table
            .order(orders::id.asc())
            .load::<OrderRow>(&mut conn)
            .await
            .map_err(internal)?;
        collect_orders(rows)
    }

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let row: OrderRow = diesel::update(orders::table.find(id))
            .set((
                orders::status.eq(status.to_string()),
                orders::updated_at.eq(Utc::now()),
            ))
            .get_result(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => order_not_found(id),
                other => internal(other),
            })?;
        Order::try_from(row)
    }

    async fn confirm_with_outbox(
        &self,
        id: i64,
        event: &OrderPlaced,
    ) -> Result<Order, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let event_data = serde_json::to_value(event).map_err(internal)?;

        let row = conn
            .transaction::<OrderRow, diesel::result::Error, _>(|conn| {
                Box::pin(async move {
                    let row: OrderRow = diesel::update(orders::table.find(id))
                        .set((
                            orders::status.eq(OrderStatus::Confirmed.to_string()),
                            orders::updated_at.eq(Utc::now()),
                        ))
                        .get_result(conn)
                        .await?;

                    let outbox = NewOutboxRow {
                        id: Uuid::new_v4(),
                        aggregate_id: id,
                        event_type: "OrderPlaced".to_string(),
                        event_data,
                    };
                    diesel::insert_into(outbox_events::table)
                        .values(&outbox)
                        .execute(conn)
                        .await?;

                    Ok(row)
                })
            })
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => order_not_found(id),
                other => internal(other),
            })?;
        Order::try_from(row)
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let rows = orders::table
            .filter(orders::status.eq(OrderStatus::Pending.to_string()))
            .filter(orders::created_at.lt(cutoff))
            .order(orders::id.asc())
            .load::<OrderRow>(&mut conn)
            .await
            .map_err(internal)?;
        collect_orders(rows)
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxRecord>, ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        let rows = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .load::<OutboxRow>(&mut conn)
            .await
            .map_err(internal)?;
        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), ServiceError> {
        let mut conn = self.pool.get().await.map_err(internal)?;
        diesel::update(outbox_events::table.find(event_id))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await
            .map_err(internal)?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    orders: BTreeMap<i64, Order>,
    outbox: Vec<OutboxRecord>,
    next_id: i64,
}

/// In-memory store with the same contract as [`PgOrderStore`].
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, new: NewOrder) -> Result<Order, ServiceError> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let now = Utc::now();
        let order = Order {
            id: state.next_id,
            user_id: new.user_id,
            product_id: new.product_id,
            quantity: new.quantity,
            total_amount: new.total_amount,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: i64) -> Result<Option<Order>, ServiceError> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn by_user(&self, user_id: i64) -> Result<Vec<Order>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Order>, ServiceError> {
        Ok(self.state.read().await.orders.values().cloned().collect())
    }

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, ServiceError> {
        let mut state = self.state.write().await;
        let order = state.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn confirm_with_outbox(
        &self,
        id: i64,
        event: &OrderPlaced,
    ) -> Result<Order, ServiceError> {
        let event_data = serde_json::to_value(event).map_err(internal)?;
        let mut state = self.state.write().await;
        let order = state.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        order.status = OrderStatus::Confirmed;
        order.updated_at = Utc::now();
        let order = order.clone();
        state.outbox.push(OutboxRecord {
            id: Uuid::new_v4(),
            aggregate_id: id,
            event_type: "OrderPlaced".to_string(),
            event_data,
            processed: false,
            created_at: Utc::now(),
        });
        Ok(order)
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxRecord>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|e| !e.processed)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        if let Some(event) = state.outbox.iter_mut().find(|e| e.id == event_id) {
            event.processed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bigdecimal::BigDecimal;

    use super::*;

    fn pending_order() -> NewOrder {
        NewOrder {
            user_id: 1,
            product_id: 2,
            quantity: 3,
            total_amount: BigDecimal::from(30),
            status: OrderStatus::Pending,
        }
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids() {
        let store = InMemoryOrderStore::new();
        let first = store.insert(pending_order()).await.unwrap();
        let second = store.insert(pending_order()).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(store.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_status_on_missing_order_is_not_found() {
        let store = InMemoryOrderStore::new();
        let err = store
            .update_status(99, OrderStatus::Shipped)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn confirm_enqueues_exactly_one_outbox_event() {
        let store = InMemoryOrderStore::new();
        let order = store.insert(pending_order()).await.unwrap();
        let event = OrderPlaced {
            order_id: order.id,
            user_id: 1,
            product_id: 2,
            amount: 30.0,
            quantity: 3,
        };

        let confirmed = store.confirm_with_outbox(order.id, &event).await.unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);

        let pending = store.unpublished_events(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].aggregate_id, order.id);

        store.mark_published(pending[0].id).await.unwrap();
        assert!(store.unpublished_events(10).await.unwrap().is_empty());
    }
}
