use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{join_messages, split_messages, StoreError};
use uuid::Uuid;

use crate::domain::{CreditEntry, Payment};
use crate::schema::{credit_entries, payments};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = payments)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub order_id: Uuid,
    pub saga_id: Uuid,
    pub price: BigDecimal,
    pub payment_status: String,
    pub failure_messages: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = credit_entries)]
pub struct CreditRecord {
    pub customer_id: Uuid,
    pub total_credit: BigDecimal,
}

impl From<&Payment> for PaymentRecord {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            customer_id: payment.customer_id,
            order_id: payment.order_id,
            saga_id: payment.saga_id,
            price: payment.price.clone(),
            payment_status: payment.status.as_str().to_string(),
            failure_messages: join_messages(&payment.failure_messages),
            created_at: payment.created_at,
        }
    }
}

impl TryFrom<PaymentRecord> for Payment {
    type Error = StoreError;

    fn try_from(record: PaymentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            order_id: record.order_id,
            saga_id: record.saga_id,
            customer_id: record.customer_id,
            price: record.price,
            status: record.payment_status.parse()?,
            failure_messages: split_messages(&record.failure_messages),
            created_at: record.created_at,
        })
    }
}

impl From<CreditRecord> for CreditEntry {
    fn from(record: CreditRecord) -> Self {
        CreditEntry::new(record.customer_id, record.total_credit)
    }
}

impl From<&CreditEntry> for CreditRecord {
    fn from(entry: &CreditEntry) -> Self {
        Self {
            customer_id: entry.customer_id,
            total_credit: entry.total_credit.clone(),
        }
    }
}
