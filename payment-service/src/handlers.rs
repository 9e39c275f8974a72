use std::sync::Arc;

use async_trait::async_trait;
use shared::consumer::decode;
use shared::{
    topics, Admission, Clock, Expectation, MessageHandler, OutboxRow, PaymentOrderStatus,
    PaymentRequest, PaymentStatus, ServiceError,
};
use tokio::sync::Notify;
use tracing::info;

use crate::domain::{CreditUpdate, Payment};
use crate::repository::PaymentRepository;

pub const AGGREGATE_TYPE: &str = "Payment";

const COMPLETE: Expectation<'static, PaymentStatus> = Expectation {
    from: &[],
    produces: &[PaymentStatus::Completed, PaymentStatus::Failed],
    when_absent: Admission::Accepted,
};

const CANCEL: Expectation<'static, PaymentStatus> = Expectation {
    from: &[PaymentStatus::Completed],
    produces: &[PaymentStatus::Cancelled, PaymentStatus::Failed],
    when_absent: Admission::OutOfOrder,
};

/// Applies payment requests to the customer's credit and answers the saga.
pub struct PaymentRequestHandler<R> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
}

impl<R: PaymentRepository> PaymentRequestHandler<R> {
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, wake: Arc<Notify>) -> Self {
        Self { repo, clock, wake }
    }

    pub async fn complete_payment(&self, request: PaymentRequest) -> Result<Admission, ServiceError> {
        let existing = self.repo.find_payment_by_saga(request.saga_id).await?;
        let admission = COMPLETE.admit(existing.map(|p| p.recorded()).as_ref(), request.id);
        if !admission.is_accepted() {
            admission.log_skip(request.saga_id, "payment request");
            return Ok(admission);
        }

        let now = self.clock.now();
        let mut credit = self.repo.find_credit(request.customer_id).await?;
        let previous = credit.as_ref().map(|c| c.total_credit.clone());
        let payment = Payment::process(&request, credit.as_mut(), now);

        let update = match (credit, previous) {
            (Some(entry), Some(previous)) if entry.total_credit != previous => Some(CreditUpdate {
                customer_id: entry.customer_id,
                previous,
                total_credit: entry.total_credit,
            }),
            _ => None,
        };
        let row = OutboxRow::from_message(&payment.response(now), AGGREGATE_TYPE, now)?;

        let admission = Admission::settle(self.repo.insert_payment(&payment, update, vec![row]).await)?;
        self.settled(admission, &payment, "payment request");
        Ok(admission)
    }

    pub async fn cancel_payment(&self, request: PaymentRequest) -> Result<Admission, ServiceError> {
        let existing = self.repo.find_payment_by_saga(request.saga_id).await?;
        let admission = CANCEL.admit(existing.as_ref().map(|p| p.recorded()).as_ref(), request.id);
        let Some(mut payment) = existing.filter(|_| admission.is_accepted()) else {
            admission.log_skip(request.saga_id, "payment cancellation");
            return Ok(admission);
        };

        let now = self.clock.now();
        let mut credit = self.repo.find_credit(payment.customer_id).await?;
        let previous = credit.as_ref().map(|c| c.total_credit.clone());
        payment.cancel(credit.as_mut())?;

        let update = match (credit, previous) {
            (Some(entry), Some(previous)) => Some(CreditUpdate {
                customer_id: entry.customer_id,
                previous,
                total_credit: entry.total_credit,
            }),
            _ => None,
        };
        let row = OutboxRow::from_message(&payment.response(now), AGGREGATE_TYPE, now)?;

        let admission = Admission::settle(
            self.repo
                .update_payment(&payment, PaymentStatus::Completed, update, vec![row])
                .await,
        )?;
        self.settled(admission, &payment, "payment cancellation");
        Ok(admission)
    }

    fn settled(&self, admission: Admission, payment: &Payment, message: &str) {
        if admission.is_accepted() {
            info!(
                saga_id = %payment.saga_id,
                order_id = %payment.order_id,
                "Payment {} is {}",
                payment.id,
                payment.status
            );
            self.wake.notify_one();
        } else {
            admission.log_skip(payment.saga_id, message);
        }
    }
}

#[async_trait]
impl<R: PaymentRepository + 'static> MessageHandler for PaymentRequestHandler<R> {
    async fn handle(&self, topic: &str, payload: &str) -> Result<Admission, ServiceError> {
        if topic != topics::PAYMENT_REQUEST {
            return Err(ServiceError::UnknownTopic(topic.to_string()));
        }
        let request: PaymentRequest = decode(topic, payload)?;
        info!(
            saga_id = %request.saga_id,
            order_id = %request.order_id,
            "Received payment request with status {}",
            request.payment_order_status
        );

        match request.payment_order_status {
            PaymentOrderStatus::Pending => self.complete_payment(request).await,
            PaymentOrderStatus::Cancelled => self.cancel_payment(request).await,
        }
    }
}
