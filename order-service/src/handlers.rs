use std::sync::Arc;

use async_trait::async_trait;
use shared::consumer::decode;
use shared::{
    topics, Admission, MessageHandler, PaymentResponse, RestaurantApprovalResponse, ServiceError,
};
use tracing::info;

use crate::repository::OrderRepository;
use crate::saga::SagaOrchestrator;

/// Feeds payment and restaurant approval responses into the saga.
pub struct ResponseListener<R> {
    orchestrator: Arc<SagaOrchestrator<R>>,
}

impl<R> ResponseListener<R> {
    pub fn new(orchestrator: Arc<SagaOrchestrator<R>>) -> Self {
        Self { orchestrator }
    }
}

pub const SUBSCRIPTIONS: [&str; 2] = [topics::PAYMENT_RESPONSE, topics::RESTAURANT_APPROVAL_RESPONSE];

#[async_trait]
impl<R: OrderRepository + 'static> MessageHandler for ResponseListener<R> {
    async fn handle(&self, topic: &str, payload: &str) -> Result<Admission, ServiceError> {
        match topic {
            topics::PAYMENT_RESPONSE => {
                let response: PaymentResponse = decode(topic, payload)?;
                info!(
                    saga_id = %response.saga_id,
                    order_id = %response.order_id,
                    "Received payment response with status {}",
                    response.payment_status
                );
                self.orchestrator.on_payment_response(response).await
            }
            topics::RESTAURANT_APPROVAL_RESPONSE => {
                let response: RestaurantApprovalResponse = decode(topic, payload)?;
                info!(
                    saga_id = %response.saga_id,
                    order_id = %response.order_id,
                    "Received restaurant approval response with status {}",
                    response.approval_status
                );
                self.orchestrator.on_approval_response(response).await
            }
            other => Err(ServiceError::UnknownTopic(other.to_string())),
        }
    }
}
