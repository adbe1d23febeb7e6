use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use shared::{PaymentStatus, ServiceError};

/// Payment projection. `transaction_id` is present iff the payment settled
/// (SUCCESS, or REFUNDED after a success).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub amount: BigDecimal,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub payment_method: String,
    pub remarks: String,
    pub created_at: DateTime<Utc>,
}

/// Fields of a settlement attempt; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: i64,
    pub amount: BigDecimal,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub payment_method: String,
    pub remarks: String,
}

#[derive(Debug, Clone, Queryable)]
pub struct PaymentRow {
    pub id: i64,
    pub order_id: i64,
    pub amount: BigDecimal,
    pub status: String,
    pub transaction_id: Option<String>,
    pub payment_method: String,
    pub remarks: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct NewPaymentRow {
    pub order_id: i64,
    pub amount: BigDecimal,
    pub status: String,
    pub transaction_id: Option<String>,
    pub payment_method: String,
    pub remarks: String,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = ServiceError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            amount: row.amount,
            status: row.status.parse()?,
            transaction_id: row.transaction_id,
            payment_method: row.payment_method,
            remarks: row.remarks,
            created_at: row.created_at,
        })
    }
}

impl From<&NewPayment> for NewPaymentRow {
    fn from(new: &NewPayment) -> Self {
        Self {
            order_id: new.order_id,
            amount: new.amount.clone(),
            status: new.status.to_string(),
            transaction_id: new.transaction_id.clone(),
            payment_method: new.payment_method.clone(),
            remarks: new.remarks.clone(),
        }
    }
}
