use async_trait::async_trait;
use shared::{OutboxRow, OutboxStore, StoreError};
use uuid::Uuid;

use crate::domain::Order;
use crate::saga::OrderPaymentSaga;

/// Order-side persistence. Every write commits aggregate state and its outbox
/// rows as one unit.
#[async_trait]
pub trait OrderRepository: OutboxStore {
    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_order_by_tracking_id(&self, tracking_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_saga(&self, saga_id: Uuid) -> Result<Option<OrderPaymentSaga>, StoreError>;

    async fn insert_order(
        &self,
        order: &Order,
        saga: &OrderPaymentSaga,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError>;

    /// Persists a saga step. Fails with [`StoreError::Conflict`] unless the
    /// stored saga is still at `expected_version`.
    async fn save_transition(
        &self,
        order: &Order,
        saga: &OrderPaymentSaga,
        expected_version: i32,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError>;
}
