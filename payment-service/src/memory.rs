use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{MemoryOutbox, OutboxKey, OutboxRow, OutboxStore, PaymentStatus, StoreError};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{CreditEntry, CreditUpdate, Payment};
use crate::repository::PaymentRepository;

#[derive(Debug, Default)]
struct Tables {
    /// Keyed by saga id, which is unique per payment.
    payments: HashMap<Uuid, Payment>,
    credits: HashMap<Uuid, CreditEntry>,
    failing_commits: usize,
}

impl Tables {
    fn check_credit(&self, update: &Option<CreditUpdate>) -> Result<(), StoreError> {
        let Some(update) = update else {
            return Ok(());
        };
        match self.credits.get(&update.customer_id) {
            Some(entry) if entry.total_credit == update.previous => Ok(()),
            _ => Err(StoreError::Unavailable(format!(
                "credit of customer {} changed concurrently",
                update.customer_id
            ))),
        }
    }

    fn apply_credit(&mut self, update: Option<CreditUpdate>) {
        if let Some(update) = update {
            self.credits.insert(
                update.customer_id,
                CreditEntry::new(update.customer_id, update.total_credit),
            );
        }
    }

    fn injected_failure(&mut self) -> Result<(), StoreError> {
        if self.failing_commits > 0 {
            self.failing_commits -= 1;
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

/// Payment store for tests and local runs. Commits lock the tables, then the outbox.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    tables: Arc<Mutex<Tables>>,
    outbox: MemoryOutbox,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> &MemoryOutbox {
        &self.outbox
    }

    /// The next `n` commits fail as if the database went away.
    pub async fn fail_next_commits(&self, n: usize) {
        self.tables.lock().await.failing_commits = n;
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.lock().await.payments.values().cloned().collect()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentStore {
    async fn find_payment_by_saga(&self, saga_id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.tables.lock().await.payments.get(&saga_id).cloned())
    }

    async fn find_credit(&self, customer_id: Uuid) -> Result<Option<CreditEntry>, StoreError> {
        Ok(self.tables.lock().await.credits.get(&customer_id).cloned())
    }

    async fn upsert_credit(&self, entry: &CreditEntry) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .credits
            .insert(entry.customer_id, entry.clone());
        Ok(())
    }

    async fn insert_payment(
        &self,
        payment: &Payment,
        credit: Option<CreditUpdate>,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let mut table = self.outbox.lock().await;

        tables.injected_failure()?;
        if tables.payments.contains_key(&payment.saga_id) {
            return Err(StoreError::UniqueViolation(format!(
                "payment for saga {}",
                payment.saga_id
            )));
        }
        table.check_insert(&outbox)?;
        tables.check_credit(&credit)?;

        tables.payments.insert(payment.saga_id, payment.clone());
        tables.apply_credit(credit);
        table.insert_all(outbox);
        Ok(())
    }

    async fn update_payment(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
        credit: Option<CreditUpdate>,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let mut table = self.outbox.lock().await;

        tables.injected_failure()?;
        match tables.payments.get(&payment.saga_id) {
            Some(stored) if stored.id == payment.id && stored.status == expected => {}
            _ => return Err(StoreError::Conflict(format!("payment {}", payment.id))),
        }
        table.check_insert(&outbox)?;
        tables.check_credit(&credit)?;

        tables.payments.insert(payment.saga_id, payment.clone());
        tables.apply_credit(credit);
        table.insert_all(outbox);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryPaymentStore {
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
