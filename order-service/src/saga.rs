//! Order payment saga: the orchestrator reacting to payment and restaurant
//! approval responses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{
    Admission, ApprovalStatus, Clock, Expectation, OrderStatus, OrderStatusEvent, OrderedProduct,
    OutboxKey, OutboxKind, OutboxRow, OutboxStore, PaymentOrderStatus, PaymentRequest,
    PaymentResponse, PaymentStatus, Recorded, RestaurantApprovalRequest,
    RestaurantApprovalResponse, RestaurantOrderStatus, SagaStatus, ServiceError,
};
use tokio::sync::Notify;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{Order, OrderEvent, PlaceOrder};
use crate::repository::OrderRepository;

pub const AGGREGATE_TYPE: &str = "Order";

#[derive(Debug, Clone, PartialEq)]
pub struct OrderPaymentSaga {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: SagaStatus,
    pub last_event_id: Option<Uuid>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderPaymentSaga {
    pub fn start(order_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            status: SagaStatus::Started,
            last_event_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn recorded(&self) -> Recorded<SagaStatus> {
        Recorded {
            status: self.status,
            last_event_id: self.last_event_id,
        }
    }

    fn advance(&mut self, next: SagaStatus, event_id: Uuid, now: DateTime<Utc>) {
        self.status = next;
        self.last_event_id = Some(event_id);
        self.version += 1;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    PaymentCompleted,
    PaymentFailed,
    PaymentCancelled,
    RestaurantApproved,
    RestaurantRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaAction {
    /// Order to PAID, ask the restaurant for approval.
    RequestApproval,
    CancelOrder,
    ApproveOrder,
    /// Order to CANCELLING, ask payment to refund.
    StartCompensation,
    /// Refund failed; the order stays CANCELLING.
    RecordFailure,
}

/// The saga transition table.
pub fn step(status: SagaStatus, trigger: Trigger) -> Option<(SagaAction, SagaStatus)> {
    use SagaStatus::*;
    use Trigger::*;

    match (status, trigger) {
        (Started, PaymentCompleted) => Some((SagaAction::RequestApproval, Processing)),
        (Started, PaymentFailed | PaymentCancelled) => Some((SagaAction::CancelOrder, Compensated)),
        (Processing, RestaurantApproved) => Some((SagaAction::ApproveOrder, Succeeded)),
        (Processing, RestaurantRejected) => Some((SagaAction::StartCompensation, Compensating)),
        (Compensating, PaymentCancelled) => Some((SagaAction::CancelOrder, Compensated)),
        (Compensating, PaymentFailed) => Some((SagaAction::RecordFailure, Failed)),
        _ => None,
    }
}

impl Trigger {
    pub fn from_payment(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Completed => Trigger::PaymentCompleted,
            PaymentStatus::Failed => Trigger::PaymentFailed,
            PaymentStatus::Cancelled => Trigger::PaymentCancelled,
        }
    }

    pub fn from_approval(status: ApprovalStatus) -> Self {
        match status {
            ApprovalStatus::Approved => Trigger::RestaurantApproved,
            ApprovalStatus::Rejected => Trigger::RestaurantRejected,
        }
    }

    pub fn expectation(self) -> Expectation<'static, SagaStatus> {
        use SagaStatus::*;

        let (from, produces): (&'static [SagaStatus], &'static [SagaStatus]) = match self {
            Trigger::PaymentCompleted => (&[Started], &[Processing]),
            Trigger::PaymentFailed => (&[Started, Compensating], &[Compensated, Failed]),
            Trigger::PaymentCancelled => (&[Started, Compensating], &[Compensated]),
            Trigger::RestaurantApproved => (&[Processing], &[Succeeded]),
            Trigger::RestaurantRejected => (&[Processing], &[Compensating]),
        };
        Expectation {
            from,
            produces,
            when_absent: Admission::OutOfOrder,
        }
    }

    /// Outbox row written whenever this trigger was applied. Its presence
    /// marks a redelivery that arrives after the saga has moved further on.
    pub fn footprint(self, saga_id: Uuid) -> OutboxKey {
        let (kind, status) = match self {
            Trigger::PaymentCompleted => (
                OutboxKind::RestaurantApprovalRequest,
                RestaurantOrderStatus::Paid.as_str(),
            ),
            Trigger::RestaurantRejected => {
                (OutboxKind::PaymentRequest, PaymentOrderStatus::Cancelled.as_str())
            }
            Trigger::RestaurantApproved => (OutboxKind::OrderEvent, OrderStatus::Approved.as_str()),
            Trigger::PaymentFailed | Trigger::PaymentCancelled => {
                (OutboxKind::OrderEvent, OrderStatus::Cancelled.as_str())
            }
        };
        OutboxKey::new(saga_id, kind, status)
    }

    fn describe(self) -> &'static str {
        match self {
            Trigger::PaymentCompleted => "payment completed",
            Trigger::PaymentFailed => "payment failed",
            Trigger::PaymentCancelled => "payment cancelled",
            Trigger::RestaurantApproved => "restaurant approval",
            Trigger::RestaurantRejected => "restaurant rejection",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub tracking_id: Uuid,
    pub saga_id: Uuid,
    pub status: OrderStatus,
}

pub struct SagaOrchestrator<R> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
}

impl<R: OrderRepository> SagaOrchestrator<R> {
    /// `wake` is signalled after every commit that wrote outbox rows.
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, wake: Arc<Notify>) -> Self {
        Self { repo, clock, wake }
    }

    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<PlacedOrder, ServiceError> {
        let (order, event) = Order::place(cmd)?;
        let now = self.clock.now();
        let saga = OrderPaymentSaga::start(order.id, now);

        let request = PaymentRequest {
            id: Uuid::new_v4(),
            saga_id: saga.id,
            order_id: order.id,
            customer_id: order.customer_id,
            price: order.price.clone(),
            payment_order_status: PaymentOrderStatus::Pending,
            created_at: now,
        };
        let rows = vec![
            OutboxRow::from_message(&request, AGGREGATE_TYPE, now)?,
            order_event_row(saga.id, event, now)?,
        ];

        self.repo.insert_order(&order, &saga, rows).await?;
        info!(order_id = %order.id, saga_id = %saga.id, "Order placed, payment requested");
        self.wake.notify_one();

        Ok(PlacedOrder {
            order_id: order.id,
            tracking_id: order.tracking_id,
            saga_id: saga.id,
            status: order.status,
        })
    }

    pub async fn on_payment_response(&self, response: PaymentResponse) -> Result<Admission, ServiceError> {
        let trigger = Trigger::from_payment(response.payment_status);
        self.apply(response.saga_id, response.id, trigger, response.failure_messages)
            .await
    }

    pub async fn on_approval_response(
        &self,
        response: RestaurantApprovalResponse,
    ) -> Result<Admission, ServiceError> {
        let trigger = Trigger::from_approval(response.approval_status);
        self.apply(response.saga_id, response.id, trigger, response.failure_messages)
            .await
    }

    pub async fn find_by_tracking_id(&self, tracking_id: Uuid) -> Result<Order, ServiceError> {
        self.repo
            .find_order_by_tracking_id(tracking_id)
            .await?
            .ok_or(ServiceError::NotFound {
                kind: "Order",
                id: tracking_id,
            })
    }

    async fn apply(
        &self,
        saga_id: Uuid,
        event_id: Uuid,
        trigger: Trigger,
        reasons: Vec<String>,
    ) -> Result<Admission, ServiceError> {
        let Some(mut saga) = self.repo.find_saga(saga_id).await? else {
            Admission::OutOfOrder.log_skip(saga_id, trigger.describe());
            return Ok(Admission::OutOfOrder);
        };

        let mut admission = trigger.expectation().admit(Some(&saga.recorded()), event_id);
        if admission == Admission::OutOfOrder
            && self.repo.find_row(&trigger.footprint(saga_id)).await?.is_some()
        {
            admission = Admission::AlreadyProcessed;
        }
        if !admission.is_accepted() {
            admission.log_skip(saga_id, trigger.describe());
            return Ok(admission);
        }
        let Some((action, next)) = step(saga.status, trigger) else {
            Admission::OutOfOrder.log_skip(saga_id, trigger.describe());
            return Ok(Admission::OutOfOrder);
        };

        let mut order = self
            .repo
            .find_order(saga.order_id)
            .await?
            .ok_or(ServiceError::NotFound {
                kind: "Order",
                id: saga.order_id,
            })?;

        let now = self.clock.now();
        let mut rows = Vec::new();
        match action {
            SagaAction::RequestApproval => {
                let event = order.pay()?;
                rows.push(OutboxRow::from_message(&approval_request(&order, saga.id, now), AGGREGATE_TYPE, now)?);
                rows.push(order_event_row(saga.id, event, now)?);
            }
            SagaAction::ApproveOrder => {
                let event = order.approve()?;
                rows.push(order_event_row(saga.id, event, now)?);
            }
            SagaAction::StartCompensation => {
                let event = order.init_cancel(reasons)?;
                let refund = PaymentRequest {
                    id: Uuid::new_v4(),
                    saga_id: saga.id,
                    order_id: order.id,
                    customer_id: order.customer_id,
                    price: order.price.clone(),
                    payment_order_status: PaymentOrderStatus::Cancelled,
                    created_at: now,
                };
                rows.push(OutboxRow::from_message(&refund, AGGREGATE_TYPE, now)?);
                rows.push(order_event_row(saga.id, event, now)?);
            }
            SagaAction::CancelOrder => {
                let event = order.cancel(reasons)?;
                rows.push(order_event_row(saga.id, event, now)?);
            }
            SagaAction::RecordFailure => {
                order.add_failure_messages(reasons);
                error!(
                    order_id = %order.id,
                    %saga_id,
                    "Refund failed while compensating, order left in {}: {:?}",
                    order.status,
                    order.failure_messages
                );
            }
        }

        let expected_version = saga.version;
        saga.advance(next, event_id, now);

        let admission = Admission::settle(
            self.repo
                .save_transition(&order, &saga, expected_version, rows)
                .await,
        )?;
        if admission.is_accepted() {
            info!(order_id = %order.id, %saga_id, "Saga moved to {} on {}", saga.status, trigger.describe());
            self.wake.notify_one();
        } else {
            admission.log_skip(saga_id, trigger.describe());
        }
        Ok(admission)
    }
}

fn approval_request(order: &Order, saga_id: Uuid, now: DateTime<Utc>) -> RestaurantApprovalRequest {
    RestaurantApprovalRequest {
        id: Uuid::new_v4(),
        saga_id,
        order_id: order.id,
        restaurant_id: order.restaurant_id,
        restaurant_order_status: RestaurantOrderStatus::Paid,
        products: order
            .items
            .iter()
            .map(|item| OrderedProduct {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect(),
        price: order.price.clone(),
        created_at: now,
    }
}

fn order_event_row(saga_id: Uuid, event: OrderEvent, now: DateTime<Utc>) -> Result<OutboxRow, serde_json::Error> {
    let message = OrderStatusEvent {
        id: Uuid::new_v4(),
        saga_id,
        order_id: event.order_id,
        tracking_id: event.tracking_id,
        order_status: event.status,
        failure_messages: event.failure_messages,
        created_at: now,
    };
    OutboxRow::from_message(&message, AGGREGATE_TYPE, now)
}
