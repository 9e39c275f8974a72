//! Transactional outbox rows and the store the dispatcher drains.
//!
//! A row is written in the same local unit of work as the aggregate change
//! that produced it. At most one row may exist per [`OutboxKey`], which makes
//! the insert itself the deduplication point for a repeated event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::StoreError;
use crate::{topics, SagaMessage, ORDER_SAGA_NAME};

crate::status_enum!(OutboxStatus {
    Started => "STARTED",
    Completed => "COMPLETED",
});

crate::status_enum!(
    /// Type discriminator of a row; decides the topic it is published to.
    OutboxKind {
        PaymentRequest => "PAYMENT_REQUEST",
        PaymentResponse => "PAYMENT_RESPONSE",
        RestaurantApprovalRequest => "RESTAURANT_APPROVAL_REQUEST",
        RestaurantApprovalResponse => "RESTAURANT_APPROVAL_RESPONSE",
        OrderEvent => "ORDER_EVENT",
    }
);

impl OutboxKind {
    pub fn topic(self) -> &'static str {
        match self {
            OutboxKind::PaymentRequest => topics::PAYMENT_REQUEST,
            OutboxKind::PaymentResponse => topics::PAYMENT_RESPONSE,
            OutboxKind::RestaurantApprovalRequest => topics::RESTAURANT_APPROVAL_REQUEST,
            OutboxKind::RestaurantApprovalResponse => topics::RESTAURANT_APPROVAL_RESPONSE,
            OutboxKind::OrderEvent => topics::ORDER_EVENTS,
        }
    }
}

/// Uniqueness key of an outbox row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutboxKey {
    pub saga_id: Uuid,
    pub kind: OutboxKind,
    pub status: String,
}

impl OutboxKey {
    pub fn new(saga_id: Uuid, kind: OutboxKind, status: impl Into<String>) -> Self {
        Self {
            saga_id,
            kind,
            status: status.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRow {
    /// Also the id of the published message.
    pub id: Uuid,
    pub saga_id: Uuid,
    pub saga_type: String,
    pub aggregate_type: String,
    pub kind: OutboxKind,
    pub status: String,
    pub payload: serde_json::Value,
    pub outbox_status: OutboxStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxRow {
    pub fn from_message<M: SagaMessage>(
        message: &M,
        aggregate_type: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: message.message_id(),
            saga_id: message.saga_id(),
            saga_type: ORDER_SAGA_NAME.to_string(),
            aggregate_type: aggregate_type.to_string(),
            kind: M::KIND,
            status: message.status_tag().to_string(),
            payload: serde_json::to_value(message)?,
            outbox_status: OutboxStatus::Started,
            attempts: 0,
            created_at,
            processed_at: None,
        })
    }

    pub fn key(&self) -> OutboxKey {
        OutboxKey::new(self.saga_id, self.kind, self.status.clone())
    }

    pub fn topic(&self) -> &'static str {
        self.kind.topic()
    }
}

/// Dispatcher-facing side of a service's outbox table.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// STARTED rows created at or before `created_before`, oldest first.
    async fn pending_rows(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRow>, StoreError>;

    /// Flips a STARTED row to COMPLETED. Returns false if it was not STARTED.
    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn record_failed_attempt(&self, id: Uuid) -> Result<(), StoreError>;

    async fn count_stale(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Deletes COMPLETED rows processed at or before `processed_before`.
    async fn purge_published(&self, processed_before: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn find_row(&self, key: &OutboxKey) -> Result<Option<OutboxRow>, StoreError>;
}

#[async_trait]
impl<T: OutboxStore + ?Sized> OutboxStore for Arc<T> {
    async fn pending_rows(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRow>, StoreError> {
        (**self).pending_rows(created_before, limit).await
    }

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        (**self).mark_published(id, at).await
    }

    async fn record_failed_attempt(&self, id: Uuid) -> Result<(), StoreError> {
        (**self).record_failed_attempt(id).await
    }

    async fn count_stale(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).count_stale(created_before).await
    }

    async fn purge_published(&self, processed_before: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge_published(processed_before).await
    }

    async fn find_row(&self, key: &OutboxKey) -> Result<Option<OutboxRow>, StoreError> {
        (**self).find_row(key).await
    }
}

/// Rows of an in-memory outbox table.
#[derive(Debug, Default)]
pub struct OutboxTable {
    rows: Vec<OutboxRow>,
}

impl OutboxTable {
    /// Rejects the batch if any key is already taken or repeated within it.
    pub fn check_insert(&self, batch: &[OutboxRow]) -> Result<(), StoreError> {
        for (i, row) in batch.iter().enumerate() {
            let key = row.key();
            let taken = self.rows.iter().any(|r| r.key() == key)
                || batch[..i].iter().any(|r| r.key() == key);
            if taken {
                return Err(StoreError::UniqueViolation(format!(
                    "outbox ({}, {}, {})",
                    key.saga_id, key.kind, key.status
                )));
            }
        }
        Ok(())
    }

    /// Call [`OutboxTable::check_insert`] first, under the same lock.
    pub fn insert_all(&mut self, batch: Vec<OutboxRow>) {
        self.rows.extend(batch);
    }

    pub fn find(&self, key: &OutboxKey) -> Option<&OutboxRow> {
        self.rows.iter().find(|r| r.key() == *key)
    }

    pub fn rows(&self) -> &[OutboxRow] {
        &self.rows
    }
}

/// In-memory outbox shared between a store's atomic commits and the dispatcher.
///
/// Stores that commit aggregate state together with outbox rows must lock
/// their own state first and the outbox second.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutbox {
    table: Arc<Mutex<OutboxTable>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, OutboxTable> {
        self.table.lock().await
    }

    pub async fn rows(&self) -> Vec<OutboxRow> {
        self.table.lock().await.rows.clone()
    }

    pub async fn rows_of_kind(&self, kind: OutboxKind) -> Vec<OutboxRow> {
        self.table
            .lock()
            .await
            .rows
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OutboxStore for MemoryOutbox {
    async fn pending_rows(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRow>, StoreError> {
        let table = self.table.lock().await;
        let mut pending: Vec<OutboxRow> = table
            .rows
            .iter()
            .filter(|r| r.outbox_status == OutboxStatus::Started && r.created_at <= created_before)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut table = self.table.lock().await;
        match table
            .rows
            .iter_mut()
            .find(|r| r.id == id && r.outbox_status == OutboxStatus::Started)
        {
            Some(row) => {
                row.outbox_status = OutboxStatus::Completed;
                row.processed_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_failed_attempt(&self, id: Uuid) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        if let Some(row) = table.rows.iter_mut().find(|r| r.id == id) {
            row.attempts += 1;
        }
        Ok(())
    }

    async fn count_stale(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .rows
            .iter()
            .filter(|r| r.outbox_status == OutboxStatus::Started && r.created_at <= created_before)
            .count() as u64)
    }

    async fn purge_published(&self, processed_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut table = self.table.lock().await;
        let before = table.rows.len();
        table.rows.retain(|r| {
            !(r.outbox_status == OutboxStatus::Completed
                && r.processed_at.is_some_and(|at| at <= processed_before))
        });
        Ok((before - table.rows.len()) as u64)
    }

    async fn find_row(&self, key: &OutboxKey) -> Result<Option<OutboxRow>, StoreError> {
        Ok(self.table.lock().await.find(key).cloned())
    }
}
