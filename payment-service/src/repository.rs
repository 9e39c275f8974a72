use async_trait::async_trait;
use shared::{OutboxRow, OutboxStore, PaymentStatus, StoreError};
use uuid::Uuid;

use crate::domain::{CreditEntry, CreditUpdate, Payment};

#[async_trait]
pub trait PaymentRepository: OutboxStore {
    async fn find_payment_by_saga(&self, saga_id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn find_credit(&self, customer_id: Uuid) -> Result<Option<CreditEntry>, StoreError>;

    async fn upsert_credit(&self, entry: &CreditEntry) -> Result<(), StoreError>;

    /// Inserts the saga's payment; a second payment for the same saga is a
    /// [`StoreError::UniqueViolation`].
    async fn insert_payment(
        &self,
        payment: &Payment,
        credit: Option<CreditUpdate>,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError>;

    /// Updates a payment still in `expected` status, else [`StoreError::Conflict`].
    async fn update_payment(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
        credit: Option<CreditUpdate>,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError>;
}
