use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::pg::{insert_rows, DbPool, PgOutbox};
use shared::{join_messages, OutboxKey, OutboxRow, OutboxStore, PaymentStatus, StoreError};
use uuid::Uuid;

use crate::domain::{CreditEntry, CreditUpdate, Payment};
use crate::models::{CreditRecord, PaymentRecord};
use crate::repository::PaymentRepository;
use crate::schema::{credit_entries, payments};

#[derive(Clone)]
pub struct PgPaymentStore {
    pool: DbPool,
    outbox: PgOutbox,
}

impl PgPaymentStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            outbox: PgOutbox::new(pool.clone()),
            pool,
        }
    }
}

/// Compare-and-set on the balance; a lost race is retried by redelivery.
async fn apply_credit(conn: &mut AsyncPgConnection, update: Option<CreditUpdate>) -> Result<(), StoreError> {
    let Some(update) = update else {
        return Ok(());
    };
    let updated = diesel::update(
        credit_entries::table
            .filter(credit_entries::customer_id.eq(update.customer_id))
            .filter(credit_entries::total_credit.eq(&update.previous)),
    )
    .set(credit_entries::total_credit.eq(&update.total_credit))
    .execute(conn)
    .await?;

    if updated == 0 {
        return Err(StoreError::Unavailable(format!(
            "credit of customer {} changed concurrently",
            update.customer_id
        )));
    }
    Ok(())
}

#[async_trait]
impl PaymentRepository for PgPaymentStore {
    async fn find_payment_by_saga(&self, saga_id: Uuid) -> Result<Option<Payment>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record = payments::table
            .filter(payments::saga_id.eq(saga_id))
            .select(PaymentRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        record.map(Payment::try_from).transpose()
    }

    async fn find_credit(&self, customer_id: Uuid) -> Result<Option<CreditEntry>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record = credit_entries::table
            .find(customer_id)
            .select(CreditRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(CreditEntry::from))
    }

    async fn upsert_credit(&self, entry: &CreditEntry) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(credit_entries::table)
            .values(CreditRecord::from(entry))
            .on_conflict(credit_entries::customer_id)
            .do_update()
            .set(credit_entries::total_credit.eq(excluded(credit_entries::total_credit)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn insert_payment(
        &self,
        payment: &Payment,
        credit: Option<CreditUpdate>,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let record = PaymentRecord::from(payment);

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(payments::table)
                    .values(&record)
                    .execute(conn)
                    .await?;

                insert_rows(conn, &outbox).await?;
                apply_credit(conn, credit).await
            })
        })
        .await
    }

    async fn update_payment(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
        credit: Option<CreditUpdate>,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let payment_id = payment.id;
        let status = payment.status.as_str();
        let failure_messages = join_messages(&payment.failure_messages);

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let updated = diesel::update(
                    payments::table
                        .filter(payments::id.eq(payment_id))
                        .filter(payments::payment_status.eq(expected.as_str())),
                )
                .set((
                    payments::payment_status.eq(status),
                    payments::failure_messages.eq(&failure_messages),
                ))
                .execute(conn)
                .await?;

                if updated == 0 {
                    return Err(StoreError::Conflict(format!("payment {}", payment_id)));
                }

                insert_rows(conn, &outbox).await?;
                apply_credit(conn, credit).await
            })
        })
        .await
    }
}

#[async_trait]
impl OutboxStore for PgPaymentStore {
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
