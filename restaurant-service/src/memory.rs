use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{MemoryOutbox, OutboxKey, OutboxRow, OutboxStore, StoreError};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Restaurant, RestaurantApproval};
use crate::repository::ApprovalRepository;

#[derive(Debug, Default)]
struct Tables {
    restaurants: HashMap<Uuid, Restaurant>,
    /// Keyed by saga id.
    approvals: HashMap<Uuid, RestaurantApproval>,
}

/// Approval store for tests and local runs. Commits lock the tables, then the outbox.
#[derive(Debug, Clone, Default)]
pub struct InMemoryApprovalStore {
    tables: Arc<Mutex<Tables>>,
    outbox: MemoryOutbox,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> &MemoryOutbox {
        &self.outbox
    }

    pub async fn approvals(&self) -> Vec<RestaurantApproval> {
        self.tables.lock().await.approvals.values().cloned().collect()
    }
}

#[async_trait]
impl ApprovalRepository for InMemoryApprovalStore {
    async fn find_approval_by_saga(&self, saga_id: Uuid) -> Result<Option<RestaurantApproval>, StoreError> {
        Ok(self.tables.lock().await.approvals.get(&saga_id).cloned())
    }

    async fn find_restaurant(&self, restaurant_id: Uuid) -> Result<Option<Restaurant>, StoreError> {
        Ok(self.tables.lock().await.restaurants.get(&restaurant_id).cloned())
    }

    async fn save_restaurant(&self, restaurant: &Restaurant) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .restaurants
            .insert(restaurant.id, restaurant.clone());
        Ok(())
    }

    async fn insert_approval(
        &self,
        approval: &RestaurantApproval,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let mut table = self.outbox.lock().await;

        if tables.approvals.contains_key(&approval.saga_id) {
            return Err(StoreError::UniqueViolation(format!(
                "approval for saga {}",
                approval.saga_id
            )));
        }
        table.check_insert(&outbox)?;

        tables.approvals.insert(approval.saga_id, approval.clone());
        table.insert_all(outbox);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryApprovalStore {
    async fn pending_rows(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRow>, StoreError> {
        self.outbox.pending_rows(created_before, limit).await
    }

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.outbox.mark_published(id, at).await
    }

    async fn record_failed_attempt(&self, id: Uuid) -> Result<(), StoreError> {
        self.outbox.record_failed_attempt(id).await
    }

    async fn count_stale(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.outbox.count_stale(created_before).await
    }

    async fn purge_published(&self, processed_before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.outbox.purge_published(processed_before).await
    }

    async fn find_row(&self, key: &OutboxKey) -> Result<Option<OutboxRow>, StoreError> {
        self.outbox.find_row(key).await
    }
}
