mod common;

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use order_service::{InMemoryOrderStore, OrderRepository, PlacedOrder, SagaOrchestrator};
use shared::{
    Admission, ApprovalStatus, ManualClock, OrderStatus, OrderStatusEvent, OutboxKey, OutboxKind,
    OutboxStore, PaymentRequest, PaymentResponse, PaymentStatus, RestaurantApprovalRequest,
    RestaurantApprovalResponse, SagaStatus,
};
use tokio::sync::Notify;
use uuid::Uuid;

struct Fixture {
    store: Arc<InMemoryOrderStore>,
    saga: SagaOrchestrator<InMemoryOrderStore>,
    placed: PlacedOrder,
}

async fn placed() -> Fixture {
    let store = Arc::new(InMemoryOrderStore::new());
    let saga = SagaOrchestrator::new(
        store.clone(),
        Arc::new(ManualClock::default()),
        Arc::new(Notify::new()),
    );
    let placed = saga.place_order(common::any_order()).await.unwrap();
    Fixture { store, saga, placed }
}

fn payment(placed: &PlacedOrder, status: PaymentStatus, reasons: &[&str]) -> PaymentResponse {
    PaymentResponse {
        id: Uuid::new_v4(),
        saga_id: placed.saga_id,
        order_id: placed.order_id,
        payment_id: Uuid::new_v4(),
        customer_id: Uuid::new_v4(),
        price: BigDecimal::from(100),
        payment_status: status,
        failure_messages: reasons.iter().map(|r| r.to_string()).collect(),
        created_at: Utc::now(),
    }
}

fn approval(placed: &PlacedOrder, status: ApprovalStatus, reasons: &[&str]) -> RestaurantApprovalResponse {
    RestaurantApprovalResponse {
        id: Uuid::new_v4(),
        saga_id: placed.saga_id,
        order_id: placed.order_id,
        restaurant_id: Uuid::new_v4(),
        approval_status: status,
        failure_messages: reasons.iter().map(|r| r.to_string()).collect(),
        created_at: Utc::now(),
    }
}

impl Fixture {
    async fn order_status(&self) -> OrderStatus {
        self.store.find_order(self.placed.order_id).await.unwrap().unwrap().status
    }

    async fn saga_status(&self) -> SagaStatus {
        self.store.find_saga(self.placed.saga_id).await.unwrap().unwrap().status
    }

    async fn has_row(&self, kind: OutboxKind, status: &str) -> bool {
        self.store
            .find_row(&OutboxKey::new(self.placed.saga_id, kind, status))
            .await
            .unwrap()
            .is_some()
    }

    async fn order_events(&self) -> Vec<OrderStatusEvent> {
        self.store
            .outbox()
            .rows_of_kind(OutboxKind::OrderEvent)
            .await
            .into_iter()
            .map(|row| serde_json::from_value(row.payload).unwrap())
            .collect()
    }
}

#[tokio::test]
async fn placing_an_order_requests_payment() {
    let f = placed().await;

    assert_eq!(f.placed.status, OrderStatus::Pending);
    assert_eq!(f.saga_status().await, SagaStatus::Started);

    let rows = f.store.outbox().rows_of_kind(OutboxKind::PaymentRequest).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "PENDING");
    assert_eq!(rows[0].aggregate_type, "Order");
    let request: PaymentRequest = serde_json::from_value(rows[0].payload.clone()).unwrap();
    assert_eq!(request.order_id, f.placed.order_id);
    assert_eq!(request.price, BigDecimal::from(100));

    let events = f.order_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tracking_id, f.placed.tracking_id);
}

#[tokio::test]
async fn forward_path_approves_the_order() {
    let f = placed().await;

    let outcome = f
        .saga
        .on_payment_response(payment(&f.placed, PaymentStatus::Completed, &[]))
        .await
        .unwrap();
    assert_eq!(outcome, Admission::Accepted);
    assert_eq!(f.order_status().await, OrderStatus::Paid);
    assert_eq!(f.saga_status().await, SagaStatus::Processing);

    let rows = f
        .store
        .outbox()
        .rows_of_kind(OutboxKind::RestaurantApprovalRequest)
        .await;
    assert_eq!(rows.len(), 1);
    let request: RestaurantApprovalRequest = serde_json::from_value(rows[0].payload.clone()).unwrap();
    assert_eq!(request.products.len(), 1);
    assert_eq!(request.products[0].quantity, 2);

    f.saga
        .on_approval_response(approval(&f.placed, ApprovalStatus::Approved, &[]))
        .await
        .unwrap();
    assert_eq!(f.order_status().await, OrderStatus::Approved);
    assert_eq!(f.saga_status().await, SagaStatus::Succeeded);

    let statuses: Vec<OrderStatus> = f.order_events().await.iter().map(|e| e.order_status).collect();
    assert_eq!(statuses.len(), 3);
    assert!(statuses.contains(&OrderStatus::Paid));
    assert!(statuses.contains(&OrderStatus::Approved));
}

#[tokio::test]
async fn rejection_compensates_the_payment() {
    let f = placed().await;
    f.saga
        .on_payment_response(payment(&f.placed, PaymentStatus::Completed, &[]))
        .await
        .unwrap();

    f.saga
        .on_approval_response(approval(
            &f.placed,
            ApprovalStatus::Rejected,
            &["Product with id 1 is not available"],
        ))
        .await
        .unwrap();
    assert_eq!(f.order_status().await, OrderStatus::Cancelling);
    assert_eq!(f.saga_status().await, SagaStatus::Compensating);
    assert!(f.has_row(OutboxKind::PaymentRequest, "CANCELLED").await);

    // Only payment acknowledgements are heard while compensating.
    let late = f
        .saga
        .on_approval_response(approval(&f.placed, ApprovalStatus::Approved, &[]))
        .await
        .unwrap();
    assert_eq!(late, Admission::OutOfOrder);

    f.saga
        .on_payment_response(payment(&f.placed, PaymentStatus::Cancelled, &[]))
        .await
        .unwrap();
    assert_eq!(f.saga_status().await, SagaStatus::Compensated);

    let order = f.saga.find_by_tracking_id(f.placed.tracking_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.failure_messages, vec!["Product with id 1 is not available".to_string()]);
}

#[tokio::test]
async fn early_payment_failure_cancels_without_approval() {
    let f = placed().await;

    f.saga
        .on_payment_response(payment(
            &f.placed,
            PaymentStatus::Failed,
            &["Customer doesn't have enough credit for payment"],
        ))
        .await
        .unwrap();

    assert_eq!(f.order_status().await, OrderStatus::Cancelled);
    assert_eq!(f.saga_status().await, SagaStatus::Compensated);
    assert!(!f.has_row(OutboxKind::RestaurantApprovalRequest, "PAID").await);
    assert!(!f.has_row(OutboxKind::PaymentRequest, "CANCELLED").await);
}

#[tokio::test]
async fn failed_refund_fails_the_saga() {
    let f = placed().await;
    f.saga
        .on_payment_response(payment(&f.placed, PaymentStatus::Completed, &[]))
        .await
        .unwrap();
    f.saga
        .on_approval_response(approval(&f.placed, ApprovalStatus::Rejected, &["closed"]))
        .await
        .unwrap();
    let events_before = f.order_events().await.len();

    f.saga
        .on_payment_response(payment(&f.placed, PaymentStatus::Failed, &["refund failed"]))
        .await
        .unwrap();

    assert_eq!(f.saga_status().await, SagaStatus::Failed);
    let order = f.store.find_order(f.placed.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelling);
    assert_eq!(order.failure_messages, vec!["closed".to_string(), "refund failed".to_string()]);
    assert_eq!(f.order_events().await.len(), events_before);
}

#[tokio::test]
async fn approval_before_payment_is_dropped() {
    let f = placed().await;

    let outcome = f
        .saga
        .on_approval_response(approval(&f.placed, ApprovalStatus::Approved, &[]))
        .await
        .unwrap();

    assert_eq!(outcome, Admission::OutOfOrder);
    assert_eq!(f.order_status().await, OrderStatus::Pending);
    assert_eq!(f.saga_status().await, SagaStatus::Started);
}

#[tokio::test]
async fn duplicate_responses_are_absorbed() {
    let f = placed().await;
    let completed = payment(&f.placed, PaymentStatus::Completed, &[]);

    assert_eq!(
        f.saga.on_payment_response(completed.clone()).await.unwrap(),
        Admission::Accepted
    );
    assert_eq!(
        f.saga.on_payment_response(completed).await.unwrap(),
        Admission::AlreadyProcessed
    );
    // Same outcome under a new message id, as after a republish.
    assert_eq!(
        f.saga
            .on_payment_response(payment(&f.placed, PaymentStatus::Completed, &[]))
            .await
            .unwrap(),
        Admission::AlreadyProcessed
    );

    let rows = f
        .store
        .outbox()
        .rows_of_kind(OutboxKind::RestaurantApprovalRequest)
        .await;
    assert_eq!(rows.len(), 1);
    assert_eq!(f.store.find_saga(f.placed.saga_id).await.unwrap().unwrap().version, 1);
}

#[tokio::test]
async fn redelivery_after_the_saga_moved_on_is_a_duplicate() {
    let f = placed().await;
    let completed = payment(&f.placed, PaymentStatus::Completed, &[]);
    f.saga.on_payment_response(completed.clone()).await.unwrap();
    f.saga
        .on_approval_response(approval(&f.placed, ApprovalStatus::Approved, &[]))
        .await
        .unwrap();
    assert_eq!(f.saga_status().await, SagaStatus::Succeeded);

    let again = f.saga.on_payment_response(completed).await.unwrap();
    assert_eq!(again, Admission::AlreadyProcessed);
    assert_eq!(f.saga_status().await, SagaStatus::Succeeded);
    assert_eq!(
        f.store
            .outbox()
            .rows_of_kind(OutboxKind::RestaurantApprovalRequest)
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn stale_responses_after_compensation_are_duplicates() {
    let f = placed().await;
    let completed = payment(&f.placed, PaymentStatus::Completed, &[]);
    let rejected = approval(&f.placed, ApprovalStatus::Rejected, &["closed"]);
    f.saga.on_payment_response(completed.clone()).await.unwrap();
    f.saga.on_approval_response(rejected.clone()).await.unwrap();
    f.saga
        .on_payment_response(payment(&f.placed, PaymentStatus::Cancelled, &[]))
        .await
        .unwrap();
    assert_eq!(f.saga_status().await, SagaStatus::Compensated);

    assert_eq!(
        f.saga.on_payment_response(completed).await.unwrap(),
        Admission::AlreadyProcessed
    );
    assert_eq!(
        f.saga.on_approval_response(rejected).await.unwrap(),
        Admission::AlreadyProcessed
    );
    // Never approved, so an approval is still out of order.
    assert_eq!(
        f.saga
            .on_approval_response(approval(&f.placed, ApprovalStatus::Approved, &[]))
            .await
            .unwrap(),
        Admission::OutOfOrder
    );
    assert_eq!(f.order_status().await, OrderStatus::Cancelled);
}

#[tokio::test]
async fn response_for_unknown_saga_is_out_of_order() {
    let f = placed().await;
    let stranger = PlacedOrder {
        saga_id: Uuid::new_v4(),
        ..f.placed.clone()
    };

    let outcome = f
        .saga
        .on_payment_response(payment(&stranger, PaymentStatus::Completed, &[]))
        .await
        .unwrap();
    assert_eq!(outcome, Admission::OutOfOrder);
    assert_eq!(f.order_status().await, OrderStatus::Pending);
}

#[tokio::test]
async fn invalid_orders_are_not_stored() {
    let store = Arc::new(InMemoryOrderStore::new());
    let saga = SagaOrchestrator::new(
        store.clone(),
        Arc::new(ManualClock::default()),
        Arc::new(Notify::new()),
    );
    let mut order = common::any_order();
    order.price = BigDecimal::from(99);

    let err = saga.place_order(order).await.unwrap_err();
    assert!(matches!(
        err,
        shared::ServiceError::Domain(shared::DomainError::OrderValidation(_))
    ));
    assert!(store.outbox().rows().await.is_empty());
}

#[tokio::test]
async fn concurrent_duplicate_responses_step_once() {
    let f = placed().await;
    let saga = Arc::new(f.saga);
    let completed = payment(&f.placed, PaymentStatus::Completed, &[]);

    let (a, b) = tokio::join!(
        saga.on_payment_response(completed.clone()),
        saga.on_payment_response(completed)
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_accepted()).count(), 1);
    assert_eq!(
        f.store
            .outbox()
            .rows_of_kind(OutboxKind::RestaurantApprovalRequest)
            .await
            .len(),
        1
    );
}
