use std::sync::Arc;

use bigdecimal::BigDecimal;

use payment_service::gateway::{FixedGateway, SettlementGateway};
use payment_service::processor::{PaymentProcessor, PaymentRequest};
use payment_service::store::{InMemoryPaymentStore, PaymentStore};
use shared::channel::InMemoryChannel;
use shared::{OrderPlaced, PaymentSettled, PaymentStatus, ServiceError};

const SETTLED_TOPIC: &str = "payment-settled";

fn fixture(
    gateway: impl SettlementGateway + 'static,
) -> (PaymentProcessor, InMemoryPaymentStore, Arc<InMemoryChannel>) {
    let store = InMemoryPaymentStore::new();
    let channel = Arc::new(InMemoryChannel::new());
    let processor = PaymentProcessor::new(
        Arc::new(store.clone()),
        Arc::new(gateway),
        channel.clone(),
        SETTLED_TOPIC,
    );
    (processor, store, channel)
}

fn order_placed(order_id: i64) -> OrderPlaced {
    OrderPlaced {
        order_id,
        user_id: 1,
        product_id: 7,
        amount: 75.0,
        quantity: 3,
    }
}

fn payment_request(order_id: i64) -> PaymentRequest {
    PaymentRequest {
        order_id,
        amount: BigDecimal::from(75),
        payment_method: "UPI".to_string(),
    }
}

#[tokio::test]
async fn approved_settlement_persists_success_and_publishes_the_fact() {
    let (processor, store, channel) = fixture(FixedGateway::approving());

    processor
        .process_order_payment(&order_placed(10))
        .await
        .unwrap();

    let payment = store.by_order(10).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.amount, BigDecimal::from(75));
    assert_eq!(payment.payment_method, "CARD");
    let transaction_id = payment.transaction_id.expect("successful payment has a transaction id");
    assert!(transaction_id.starts_with("TXN-"));

    let settled = channel.records(SETTLED_TOPIC).await;
    assert_eq!(settled.len(), 1);
    let fact: PaymentSettled = serde_json::from_str(&settled[0].1).unwrap();
    assert_eq!(fact.order_id, 10);
    assert_eq!(fact.status, "SUCCESS");
    assert_eq!(fact.transaction_id.as_deref(), Some(transaction_id.as_str()));
    assert_eq!(settled[0].0, "10");
}

#[tokio::test]
async fn duplicate_delivery_is_a_no_op_with_a_stable_transaction_id() {
    let (processor, store, channel) = fixture(FixedGateway::approving());
    let event = order_placed(11);

    processor.process_order_payment(&event).await.unwrap();
    let first = store.by_order(11).await.unwrap().unwrap();

    processor.process_order_payment(&event).await.unwrap();

    let payments = store.all().await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].transaction_id, first.transaction_id);
    assert_eq!(channel.records(SETTLED_TOPIC).await.len(), 1);
}

#[tokio::test]
async fn declined_settlement_persists_failed_without_a_transaction_id() {
    let (processor, store, channel) = fixture(FixedGateway::declining());

    processor
        .process_order_payment(&order_placed(12))
        .await
        .unwrap();

    let payment = store.by_order(12).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.transaction_id.is_none());
    assert!(payment.remarks.starts_with("Payment failed"));

    let settled = channel.records(SETTLED_TOPIC).await;
    assert_eq!(settled.len(), 1);
    let fact: PaymentSettled = serde_json::from_str(&settled[0].1).unwrap();
    assert_eq!(fact.status, "FAILED");
    assert!(fact.transaction_id.is_none());
}

#[tokio::test]
async fn settled_publish_failure_does_not_fail_processing() {
    let (processor, store, channel) = fixture(FixedGateway::approving());
    channel.set_fail(SETTLED_TOPIC, true).await;

    processor
        .process_order_payment(&order_placed(13))
        .await
        .unwrap();

    assert!(store.by_order(13).await.unwrap().is_some());
    assert!(channel.records(SETTLED_TOPIC).await.is_empty());
}

#[tokio::test]
async fn direct_path_rejects_duplicates_synchronously() {
    let (processor, _store, channel) = fixture(FixedGateway::approving());

    let payment = processor.process_payment(payment_request(20)).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.payment_method, "UPI");

    let err = processor
        .process_payment(payment_request(20))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::DuplicatePayment(20)));

    // Only the event-driven path emits the settled fact.
    assert!(channel.records(SETTLED_TOPIC).await.is_empty());
}

#[tokio::test]
async fn direct_path_validates_the_amount() {
    let (processor, _store, _channel) = fixture(FixedGateway::approving());

    let err = processor
        .process_payment(PaymentRequest {
            order_id: 21,
            amount: BigDecimal::from(0),
            payment_method: "CARD".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn refund_is_legal_exactly_once_and_only_from_success() {
    let (processor, _store, _channel) = fixture(FixedGateway::approving());
    let payment = processor.process_payment(payment_request(30)).await.unwrap();

    let refunded = processor.refund_payment(payment.id).await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.remarks, "Payment refunded successfully");
    // The original transaction id survives the refund.
    assert_eq!(refunded.transaction_id, payment.transaction_id);

    let err = processor.refund_payment(payment.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStateTransition(_)));

    let err = processor.refund_payment(999).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
}

#[tokio::test]
async fn failed_payments_cannot_be_refunded() {
    let (processor, _store, _channel) = fixture(FixedGateway::declining());
    let payment = processor.process_payment(payment_request(31)).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);

    let err = processor.refund_payment(payment.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn reads_cover_id_order_and_status() {
    let (processor, _store, _channel) = fixture(FixedGateway::approving());
    let payment = processor.process_payment(payment_request(40)).await.unwrap();

    assert_eq!(processor.payment_by_id(payment.id).await.unwrap().id, payment.id);
    assert_eq!(
        processor.payment_by_order(40).await.unwrap().order_id,
        40
    );
    assert_eq!(processor.all_payments().await.unwrap().len(), 1);
    assert_eq!(
        processor
            .payments_by_status(PaymentStatus::Success)
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(processor
        .payments_by_status(PaymentStatus::Failed)
        .await
        .unwrap()
        .is_empty());

    let err = processor.payment_by_order(41).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
}
