//! All three services wired through one in-memory bus and their outbox dispatchers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bigdecimal::BigDecimal;
use order_service::{InMemoryOrderStore, OrderRepository, PlacedOrder, ResponseListener, SagaOrchestrator};
use payment_service::{CreditEntry, InMemoryPaymentStore, PaymentRepository, PaymentRequestHandler};
use restaurant_service::{
    ApprovalRepository, ApprovalRequestHandler, InMemoryApprovalStore, Product, Restaurant,
};
use shared::consumer::deliver;
use shared::{
    topics, Clock, DispatchSettings, InMemoryBus, ManualClock, MessageHandler, OrderStatus,
    OrderStatusEvent, OutboxDispatcher, OutboxStatus, SagaStatus,
};
use uuid::Uuid;

const HANDLER_TIMEOUT: Duration = Duration::from_secs(1);

struct World {
    bus: InMemoryBus,
    orders: Arc<InMemoryOrderStore>,
    payments: Arc<InMemoryPaymentStore>,
    approvals: Arc<InMemoryApprovalStore>,
    saga: Arc<SagaOrchestrator<InMemoryOrderStore>>,
    listener: ResponseListener<InMemoryOrderStore>,
    payment_handler: PaymentRequestHandler<InMemoryPaymentStore>,
    approval_handler: ApprovalRequestHandler<InMemoryApprovalStore>,
    order_outbox: OutboxDispatcher<Arc<InMemoryOrderStore>, InMemoryBus>,
    payment_outbox: OutboxDispatcher<Arc<InMemoryPaymentStore>, InMemoryBus>,
    approval_outbox: OutboxDispatcher<Arc<InMemoryApprovalStore>, InMemoryBus>,
    order_events: Vec<OrderStatusEvent>,
    restaurant_id: Uuid,
    burger: Uuid,
    soup: Uuid,
}

impl World {
    async fn new() -> Self {
        let bus = InMemoryBus::new();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let settings = DispatchSettings {
            debounce: Duration::ZERO,
            ..DispatchSettings::default()
        };

        let orders = Arc::new(InMemoryOrderStore::new());
        let payments = Arc::new(InMemoryPaymentStore::new());
        let approvals = Arc::new(InMemoryApprovalStore::new());

        let order_outbox = OutboxDispatcher::new(orders.clone(), bus.clone(), clock.clone(), settings.clone());
        let payment_outbox = OutboxDispatcher::new(payments.clone(), bus.clone(), clock.clone(), settings.clone());
        let approval_outbox = OutboxDispatcher::new(approvals.clone(), bus.clone(), clock.clone(), settings);

        let saga = Arc::new(SagaOrchestrator::new(orders.clone(), clock.clone(), order_outbox.notifier()));
        let listener = ResponseListener::new(saga.clone());
        let payment_handler = PaymentRequestHandler::new(payments.clone(), clock.clone(), payment_outbox.notifier());
        let approval_handler = ApprovalRequestHandler::new(approvals.clone(), clock, approval_outbox.notifier());

        let restaurant_id = Uuid::new_v4();
        let burger = Uuid::new_v4();
        let soup = Uuid::new_v4();
        approvals
            .save_restaurant(&Restaurant::new(
                restaurant_id,
                "restaurant_1",
                true,
                vec![
                    Product {
                        id: burger,
                        name: "burger".into(),
                        price: BigDecimal::from(50),
                        available: true,
                    },
                    Product {
                        id: soup,
                        name: "soup".into(),
                        price: BigDecimal::from(50),
                        available: false,
                    },
                ],
            ))
            .await
            .unwrap();

        World {
            bus,
            orders,
            payments,
            approvals,
            saga,
            listener,
            payment_handler,
            approval_handler,
            order_outbox,
            payment_outbox,
            approval_outbox,
            order_events: Vec::new(),
            restaurant_id,
            burger,
            soup,
        }
    }

    async fn credit(&self, customer_id: Uuid, amount: i64) {
        self.payments
            .upsert_credit(&CreditEntry::new(customer_id, BigDecimal::from(amount)))
            .await
            .unwrap();
    }

    async fn place(&self, product_id: Uuid, credit: i64) -> PlacedOrder {
        let order = common::place_order(self.restaurant_id, product_id);
        self.credit(order.customer_id, credit).await;
        self.saga.place_order(order).await.unwrap()
    }

    /// Publishes every outbox and hands deliveries to their consumers until quiet.
    async fn settle(&mut self) {
        for _ in 0..16 {
            self.order_outbox.dispatch_pending().await.unwrap();
            self.payment_outbox.dispatch_pending().await.unwrap();
            self.approval_outbox.dispatch_pending().await.unwrap();

            let mut delivered = 0;
            for d in self.bus.drain(topics::PAYMENT_REQUEST).await {
                consume(&self.payment_handler, &d.topic, &d.payload).await;
                delivered += 1;
            }
            for d in self.bus.drain(topics::RESTAURANT_APPROVAL_REQUEST).await {
                consume(&self.approval_handler, &d.topic, &d.payload).await;
                delivered += 1;
            }
            for topic in [topics::PAYMENT_RESPONSE, topics::RESTAURANT_APPROVAL_RESPONSE] {
                for d in self.bus.drain(topic).await {
                    consume(&self.listener, &d.topic, &d.payload).await;
                    delivered += 1;
                }
            }
            for d in self.bus.drain(topics::ORDER_EVENTS).await {
                self.order_events.push(serde_json::from_str(&d.payload).unwrap());
            }

            if delivered == 0 {
                return;
            }
        }
        panic!("the services never went quiet");
    }

    async fn saga_status(&self, placed: &PlacedOrder) -> SagaStatus {
        self.orders.find_saga(placed.saga_id).await.unwrap().unwrap().status
    }
}

async fn consume<H: MessageHandler>(handler: &H, topic: &str, payload: &str) {
    for _ in 0..3 {
        if !deliver(handler, topic, payload, HANDLER_TIMEOUT).await {
            return;
        }
    }
    panic!("message on {} kept asking for redelivery", topic);
}

#[tokio::test]
async fn order_is_paid_and_approved() {
    let mut world = World::new().await;
    let placed = world.place(world.burger, 500).await;

    world.settle().await;

    let order = world.saga.find_by_tracking_id(placed.tracking_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Approved);
    assert_eq!(world.saga_status(&placed).await, SagaStatus::Succeeded);
    let credit = world.payments.find_credit(order.customer_id).await.unwrap().unwrap();
    assert_eq!(credit.total_credit, BigDecimal::from(400));

    let statuses: Vec<OrderStatus> = world.order_events.iter().map(|e| e.order_status).collect();
    assert_eq!(statuses, vec![OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Approved]);

    let unpublished = world
        .orders
        .outbox()
        .rows()
        .await
        .into_iter()
        .filter(|r| r.outbox_status == OutboxStatus::Started)
        .count();
    assert_eq!(unpublished, 0);
}

#[tokio::test]
async fn rejected_order_is_refunded_and_cancelled() {
    let mut world = World::new().await;
    let placed = world.place(world.soup, 500).await;

    world.settle().await;

    let order = world.saga.find_by_tracking_id(placed.tracking_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(world.saga_status(&placed).await, SagaStatus::Compensated);
    assert!(order.failure_messages[0].contains("is not available"));

    let credit = world.payments.find_credit(order.customer_id).await.unwrap().unwrap();
    assert_eq!(credit.total_credit, BigDecimal::from(500));
    assert_eq!(world.approvals.approvals().await.len(), 1);
}

#[tokio::test]
async fn insufficient_credit_cancels_before_the_restaurant_hears_of_it() {
    let mut world = World::new().await;
    let placed = world.place(world.burger, 10).await;

    world.settle().await;

    let order = world.saga.find_by_tracking_id(placed.tracking_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(world.approvals.approvals().await.is_empty());
    assert_eq!(
        world.order_events.last().map(|e| e.order_status),
        Some(OrderStatus::Cancelled)
    );
}

#[tokio::test]
async fn lost_acknowledgement_republishes_without_double_charging() {
    let mut world = World::new().await;
    let placed = world.place(world.burger, 500).await;

    // The first row reaches the broker but the dispatcher never hears back.
    world.bus.lose_acks(1).await;
    world.settle().await;

    let order = world.saga.find_by_tracking_id(placed.tracking_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Approved);
    assert_eq!(world.payments.payments().await.len(), 1);
    let credit = world.payments.find_credit(order.customer_id).await.unwrap().unwrap();
    assert_eq!(credit.total_credit, BigDecimal::from(400));

    let republished = world
        .orders
        .outbox()
        .rows()
        .await
        .into_iter()
        .filter(|r| r.attempts > 0)
        .count();
    assert_eq!(republished, 1);
}

#[tokio::test]
async fn broker_outage_delays_but_does_not_lose_the_saga() {
    let mut world = World::new().await;
    let placed = world.place(world.burger, 500).await;

    world.bus.fail_next(2).await;
    world.settle().await;
    // Nothing reached a consumer on the failed pass, so run again once the broker is back.
    world.settle().await;

    assert_eq!(world.saga_status(&placed).await, SagaStatus::Succeeded);
    assert_eq!(world.payments.payments().await.len(), 1);
}
