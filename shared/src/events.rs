//! Event schemas shared between the order and payment services.
//!
//! Both events are immutable facts. They are field-stable and unversioned:
//! consumers tolerate unknown fields, producers never remove or rename one.

use serde::{Deserialize, Serialize};

/// Topic carrying [`OrderPlaced`] facts, keyed by order id.
pub const ORDER_PLACED_TOPIC: &str = "order-placed";

/// Topic carrying [`PaymentSettled`] facts. Nothing in this system consumes
/// it today; it exists for downstream services.
pub const PAYMENT_SETTLED_TOPIC: &str = "payment-settled";

/// Consumer group of the payment processor.
pub const PAYMENT_GROUP: &str = "payment-processor";

/// Published once per successfully confirmed order. May be delivered to a
/// consumer more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaced {
    pub order_id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub amount: f64,
    pub quantity: i32,
}

/// Published after a payment attempt has been persisted. `transaction_id`
/// is present iff the payment settled successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSettled {
    pub order_id: i64,
    pub status: String,
    pub transaction_id: Option<String>,
}

impl OrderPlaced {
    /// Record key. Keying by order id gives per-order ordering and nothing
    /// more.
    pub fn key(&self) -> String {
        self.order_id.to_string()
    }
}

impl PaymentSettled {
    pub fn key(&self) -> String {
        self.order_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_placed_wire_form_is_camel_case() {
        let event = OrderPlaced {
            order_id: 42,
            user_id: 7,
            product_id: 3,
            amount: 75.0,
            quantity: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["orderId"], 42);
        assert_eq!(json["userId"], 7);
        assert_eq!(json["productId"], 3);
        assert_eq!(json["amount"], 75.0);
        assert_eq!(json["quantity"], 3);
    }

    #[test]
    fn payment_settled_serializes_missing_transaction_as_null() {
        let event = PaymentSettled {
            order_id: 42,
            status: "FAILED".to_string(),
            transaction_id: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["transactionId"].is_null());
        assert_eq!(json["status"], "FAILED");
    }

    #[test]
    fn events_round_trip() {
        let event = OrderPlaced {
            order_id: 1,
            user_id: 2,
            product_id: 3,
            amount: 10.5,
            quantity: 4,
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: OrderPlaced = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(event.key(), "1");
    }
}
