use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use shared::{OrderStatus, ServiceError};

/// Order projection returned to callers and handled by the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub total_amount: BigDecimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields fixed at creation time; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub total_amount: BigDecimal,
    pub status: OrderStatus,
}

/// Event captured in the same transaction as the state change it describes,
/// awaiting relay to the channel.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub aggregate_id: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
pub struct OrderRow {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub total_amount: BigDecimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrderRow {
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub total_amount: BigDecimal,
    pub status: String,
}

#[derive(Debug, Clone, Queryable)]
pub struct OutboxRow {
    pub id: Uuid,
    pub aggregate_id: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxRow {
    pub id: Uuid,
    pub aggregate_id: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl TryFrom<OrderRow> for Order {
    type Error = ServiceError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            product_id: row.product_id,
            quantity: row.quantity,
            total_amount: row.total_amount,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&NewOrder> for NewOrderRow {
    fn from(new: &NewOrder) -> Self {
        Self {
            user_id: new.user_id,
            product_id: new.product_id,
            quantity: new.quantity,
            total_amount: new.total_amount.clone(),
            status: new.status.to_string(),
        }
    }
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            event_data: row.event_data,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}
