use async_trait::async_trait;
use shared::{OutboxRow, OutboxStore, StoreError};
use uuid::Uuid;

use crate::domain::{Restaurant, RestaurantApproval};

#[async_trait]
pub trait ApprovalRepository: OutboxStore {
    async fn find_approval_by_saga(&self, saga_id: Uuid) -> Result<Option<RestaurantApproval>, StoreError>;

    async fn find_restaurant(&self, restaurant_id: Uuid) -> Result<Option<Restaurant>, StoreError>;

    /// Creates or replaces a restaurant together with its catalogue.
    async fn save_restaurant(&self, restaurant: &Restaurant) -> Result<(), StoreError>;

    /// One approval per saga; a second one is a [`StoreError::UniqueViolation`].
    async fn insert_approval(
        &self,
        approval: &RestaurantApproval,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError>;
}
