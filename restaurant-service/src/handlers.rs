use std::sync::Arc;

use async_trait::async_trait;
use shared::consumer::decode;
use shared::{
    topics, Admission, ApprovalStatus, Clock, Expectation, MessageHandler, OutboxRow,
    RestaurantApprovalRequest, ServiceError,
};
use tokio::sync::Notify;
use tracing::info;

use crate::domain::RestaurantApproval;
use crate::repository::ApprovalRepository;

pub const AGGREGATE_TYPE: &str = "RestaurantApproval";

const APPROVE: Expectation<'static, ApprovalStatus> = Expectation {
    from: &[],
    produces: &[ApprovalStatus::Approved, ApprovalStatus::Rejected],
    when_absent: Admission::Accepted,
};

pub struct ApprovalRequestHandler<R> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
}

impl<R: ApprovalRepository> ApprovalRequestHandler<R> {
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, wake: Arc<Notify>) -> Self {
        Self { repo, clock, wake }
    }

    pub async fn approve_order(&self, request: RestaurantApprovalRequest) -> Result<Admission, ServiceError> {
        let existing = self.repo.find_approval_by_saga(request.saga_id).await?;
        let admission = APPROVE.admit(existing.map(|a| a.recorded()).as_ref(), request.id);
        if !admission.is_accepted() {
            admission.log_skip(request.saga_id, "approval request");
            return Ok(admission);
        }

        let now = self.clock.now();
        let restaurant = self.repo.find_restaurant(request.restaurant_id).await?;
        let approval = RestaurantApproval::decide(&request, restaurant.as_ref(), now);
        let row = OutboxRow::from_message(&approval.response(now), AGGREGATE_TYPE, now)?;

        let admission = Admission::settle(self.repo.insert_approval(&approval, vec![row]).await)?;
        if admission.is_accepted() {
            info!(
                saga_id = %approval.saga_id,
                order_id = %approval.order_id,
                "Order {} by restaurant {}: {:?}",
                approval.status,
                approval.restaurant_id,
                approval.failure_messages
            );
            self.wake.notify_one();
        } else {
            admission.log_skip(request.saga_id, "approval request");
        }
        Ok(admission)
    }
}

#[async_trait]
impl<R: ApprovalRepository + 'static> MessageHandler for ApprovalRequestHandler<R> {
    async fn handle(&self, topic: &str, payload: &str) -> Result<Admission, ServiceError> {
        if topic != topics::RESTAURANT_APPROVAL_REQUEST {
            return Err(ServiceError::UnknownTopic(topic.to_string()));
        }
        let request: RestaurantApprovalRequest = decode(topic, payload)?;
        info!(
            saga_id = %request.saga_id,
            order_id = %request.order_id,
            "Received approval request for restaurant {}",
            request.restaurant_id
        );
        self.approve_order(request).await
    }
}
