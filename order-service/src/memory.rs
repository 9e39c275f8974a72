use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{MemoryOutbox, OutboxKey, OutboxRow, OutboxStore, StoreError};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::Order;
use crate::repository::OrderRepository;
use crate::saga::OrderPaymentSaga;

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    sagas: HashMap<Uuid, OrderPaymentSaga>,
}

/// Order store for tests and local runs. Commits lock the tables, then the outbox.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<Mutex<Tables>>,
    outbox: MemoryOutbox,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> &MemoryOutbox {
        &self.outbox
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderStore {
    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.lock().await.orders.get(&order_id).cloned())
    }

    async fn find_order_by_tracking_id(&self, tracking_id: Uuid) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.tracking_id == tracking_id)
            .cloned())
    }

    async fn find_saga(&self, saga_id: Uuid) -> Result<Option<OrderPaymentSaga>, StoreError> {
        Ok(self.tables.lock().await.sagas.get(&saga_id).cloned())
    }

    async fn insert_order(
        &self,
        order: &Order,
        saga: &OrderPaymentSaga,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let mut table = self.outbox.lock().await;

        if tables.orders.contains_key(&order.id)
            || tables.orders.values().any(|o| o.tracking_id == order.tracking_id)
        {
            return Err(StoreError::UniqueViolation(format!("order {}", order.id)));
        }
        if tables.sagas.contains_key(&saga.id) || tables.sagas.values().any(|s| s.order_id == order.id) {
            return Err(StoreError::UniqueViolation(format!("saga {}", saga.id)));
        }
        table.check_insert(&outbox)?;

        tables.orders.insert(order.id, order.clone());
        tables.sagas.insert(saga.id, saga.clone());
        table.insert_all(outbox);
        Ok(())
    }

    async fn save_transition(
        &self,
        order: &Order,
        saga: &OrderPaymentSaga,
        expected_version: i32,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let mut table = self.outbox.lock().await;

        match tables.sagas.get(&saga.id) {
            Some(stored) if stored.version == expected_version => {}
            Some(_) => return Err(StoreError::Conflict(format!("saga {}", saga.id))),
            None => return Err(StoreError::Unavailable(format!("saga {} vanished", saga.id))),
        }
        if !tables.orders.contains_key(&order.id) {
            return Err(StoreError::Unavailable(format!("order {} vanished", order.id)));
        }
        table.check_insert(&outbox)?;

        tables.orders.insert(order.id, order.clone());
        tables.sagas.insert(saga.id, saga.clone());
        table.insert_all(outbox);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOrderStore {
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
