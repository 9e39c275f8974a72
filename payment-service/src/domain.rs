use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::Deserialize;
use shared::{DomainError, PaymentRequest, PaymentResponse, PaymentStatus, Recorded};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreditEntry {
    pub customer_id: Uuid,
    pub total_credit: BigDecimal,
}

impl CreditEntry {
    pub fn new(customer_id: Uuid, total_credit: BigDecimal) -> Self {
        Self {
            customer_id,
            total_credit,
        }
    }
}

/// A credit balance change, applied only if the stored balance is still `previous`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditUpdate {
    pub customer_id: Uuid,
    pub previous: BigDecimal,
    pub total_credit: BigDecimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub saga_id: Uuid,
    pub customer_id: Uuid,
    pub price: BigDecimal,
    pub status: PaymentStatus,
    pub failure_messages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Charges the customer's credit. A payment that cannot be charged is
    /// still created, as FAILED, so the saga hears about it.
    pub fn process(request: &PaymentRequest, credit: Option<&mut CreditEntry>, now: DateTime<Utc>) -> Payment {
        let mut payment = Payment {
            id: Uuid::new_v4(),
            order_id: request.order_id,
            saga_id: request.saga_id,
            customer_id: request.customer_id,
            price: request.price.clone(),
            status: PaymentStatus::Completed,
            failure_messages: Vec::new(),
            created_at: now,
        };

        if payment.price <= BigDecimal::zero() {
            payment.fail("Total price must be greater than zero".to_string());
            return payment;
        }

        match credit {
            None => payment.fail(format!("Customer {} has no credit entry", payment.customer_id)),
            Some(entry) if entry.total_credit < payment.price => payment.fail(format!(
                "Customer {} doesn't have enough credit for payment",
                payment.customer_id
            )),
            Some(entry) => entry.total_credit -= &payment.price,
        }
        payment
    }

    /// Refunds a completed payment. Without a credit entry to refund into,
    /// the payment is marked FAILED instead.
    pub fn cancel(&mut self, credit: Option<&mut CreditEntry>) -> Result<(), DomainError> {
        if self.status != PaymentStatus::Completed {
            return Err(DomainError::violation(
                "Payment",
                self.id,
                format!("cannot cancel a payment in status {}", self.status),
            ));
        }

        match credit {
            Some(entry) => {
                entry.total_credit += &self.price;
                self.status = PaymentStatus::Cancelled;
            }
            None => self.fail(format!(
                "Customer {} has no credit entry to refund",
                self.customer_id
            )),
        }
        Ok(())
    }

    pub fn recorded(&self) -> Recorded<PaymentStatus> {
        Recorded::new(self.status)
    }

    pub fn response(&self, now: DateTime<Utc>) -> PaymentResponse {
        PaymentResponse {
            id: Uuid::new_v4(),
            saga_id: self.saga_id,
            order_id: self.order_id,
            payment_id: self.id,
            customer_id: self.customer_id,
            price: self.price.clone(),
            payment_status: self.status,
            failure_messages: self.failure_messages.clone(),
            created_at: now,
        }
    }

    fn fail(&mut self, reason: String) {
        self.status = PaymentStatus::Failed;
        self.failure_messages.push(reason);
    }
}
