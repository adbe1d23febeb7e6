//! End-to-end saga flow over the in-memory channel: place an order, relay
//! the OrderPlaced fact, settle the payment, tolerate redelivery.

use std::sync::Arc;

use bigdecimal::BigDecimal;

use order_service::clients::{InMemoryIdentity, InMemoryStockLedger};
use order_service::outbox::OutboxRelay;
use order_service::service::{OrderOrchestrator, PlaceOrder};
use order_service::store::InMemoryOrderStore;
use payment_service::consumer::OrderPlacedHandler;
use payment_service::gateway::FixedGateway;
use payment_service::processor::PaymentProcessor;
use payment_service::store::{InMemoryPaymentStore, PaymentStore};
use shared::channel::InMemoryChannel;
use shared::events::{ORDER_PLACED_TOPIC, PAYMENT_SETTLED_TOPIC};
use shared::{OrderStatus, PaymentSettled, PaymentStatus};

struct World {
    orchestrator: OrderOrchestrator,
    relay: OutboxRelay,
    channel: Arc<InMemoryChannel>,
    payment_store: InMemoryPaymentStore,
    stock: InMemoryStockLedger,
}

async fn world(approve: bool) -> World {
    let order_store = InMemoryOrderStore::new();
    let identity = InMemoryIdentity::new();
    let stock = InMemoryStockLedger::new();
    identity.add_user(1).await;
    stock
        .add_product(7, "Mechanical Keyboard", "25.00".parse().unwrap(), 10)
        .await;

    let orchestrator = OrderOrchestrator::new(
        Arc::new(order_store.clone()),
        Arc::new(identity),
        Arc::new(stock.clone()),
    );

    let channel = Arc::new(InMemoryChannel::new());

    let payment_store = InMemoryPaymentStore::new();
    let gateway = if approve {
        FixedGateway::approving()
    } else {
        FixedGateway::declining()
    };
    let processor = Arc::new(PaymentProcessor::new(
        Arc::new(payment_store.clone()),
        Arc::new(gateway),
        channel.clone(),
        PAYMENT_SETTLED_TOPIC,
    ));
    channel
        .subscribe(
            ORDER_PLACED_TOPIC,
            Arc::new(OrderPlacedHandler::new(processor)),
        )
        .await;

    let relay = OutboxRelay::new(
        Arc::new(order_store.clone()),
        channel.clone(),
        ORDER_PLACED_TOPIC,
    );

    World {
        orchestrator,
        relay,
        channel,
        payment_store,
        stock,
    }
}

#[tokio::test]
async fn a_placed_order_settles_exactly_once_even_under_redelivery() {
    let w = world(true).await;

    let order = w
        .orchestrator
        .place_order(PlaceOrder {
            user_id: 1,
            product_id: 7,
            quantity: 3,
        })
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.total_amount, "75.00".parse::<BigDecimal>().unwrap());
    assert_eq!(w.stock.stock_of(7).await, Some(7));

    // The response never waits on the broker: nothing is settled until the
    // relay pushes the fact through the channel.
    assert!(w.payment_store.by_order(order.id).await.unwrap().is_none());
    assert_eq!(w.relay.drain().await.unwrap(), 1);

    let payment = w.payment_store.by_order(order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.amount, BigDecimal::from(75));

    // Crash-induced redelivery of the same record changes nothing.
    w.channel.redeliver(ORDER_PLACED_TOPIC, 0).await.unwrap();
    let payments = w.payment_store.all().await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].transaction_id, payment.transaction_id);

    let settled = w.channel.records(PAYMENT_SETTLED_TOPIC).await;
    assert_eq!(settled.len(), 1);
    let fact: PaymentSettled = serde_json::from_str(&settled[0].1).unwrap();
    assert_eq!(fact.order_id, order.id);
    assert_eq!(fact.status, "SUCCESS");
    assert!(fact.transaction_id.is_some());
}

#[tokio::test]
async fn a_declined_settlement_still_leaves_the_order_confirmed() {
    let w = world(false).await;

    let order = w
        .orchestrator
        .place_order(PlaceOrder {
            user_id: 1,
            product_id: 7,
            quantity: 1,
        })
        .await
        .unwrap();
    w.relay.drain().await.unwrap();

    let payment = w.payment_store.by_order(order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.transaction_id.is_none());

    // PaymentSettled has no consumer here, so the order stays CONFIRMED.
    let order = w.orchestrator.get_order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);

    let settled = w.channel.records(PAYMENT_SETTLED_TOPIC).await;
    assert_eq!(settled.len(), 1);
    let fact: PaymentSettled = serde_json::from_str(&settled[0].1).unwrap();
    assert_eq!(fact.status, "FAILED");
    assert!(fact.transaction_id.is_none());
}

#[tokio::test]
async fn per_order_keying_separates_independent_orders() {
    let w = world(true).await;

    for _ in 0..2 {
        w.orchestrator
            .place_order(PlaceOrder {
                user_id: 1,
                product_id: 7,
                quantity: 1,
            })
            .await
            .unwrap();
    }
    assert_eq!(w.relay.drain().await.unwrap(), 2);

    let records = w.channel.records(ORDER_PLACED_TOPIC).await;
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].0, records[1].0);
    assert_eq!(w.payment_store.all().await.unwrap().len(), 2);
}
