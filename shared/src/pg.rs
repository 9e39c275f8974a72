//! Postgres outbox table, shared by every service's schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::error::StoreError;
use crate::outbox::{OutboxKey, OutboxRow, OutboxStatus, OutboxStore};

pub type DbPool = Pool<AsyncPgConnection>;

diesel::table! {
    outbox (id) {
        id -> Uuid,
        saga_id -> Uuid,
        saga_type -> Varchar,
        aggregate_type -> Varchar,
        kind -> Varchar,
        status -> Varchar,
        payload -> Jsonb,
        outbox_status -> Varchar,
        attempts -> Int4,
        created_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
    }
}

pub async fn connect(database_url: &str) -> anyhow::Result<DbPool> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder().build(config).await?;
    Ok(pool)
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = outbox)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub saga_id: Uuid,
    pub saga_type: String,
    pub aggregate_type: String,
    pub kind: String,
    pub status: String,
    pub payload: serde_json::Value,
    pub outbox_status: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<&OutboxRow> for OutboxRecord {
    fn from(row: &OutboxRow) -> Self {
        Self {
            id: row.id,
            saga_id: row.saga_id,
            saga_type: row.saga_type.clone(),
            aggregate_type: row.aggregate_type.clone(),
            kind: row.kind.as_str().to_string(),
            status: row.status.clone(),
            payload: row.payload.clone(),
            outbox_status: row.outbox_status.as_str().to_string(),
            attempts: row.attempts,
            created_at: row.created_at,
            processed_at: row.processed_at,
        }
    }
}

impl TryFrom<OutboxRecord> for OutboxRow {
    type Error = StoreError;

    fn try_from(record: OutboxRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            saga_id: record.saga_id,
            saga_type: record.saga_type,
            aggregate_type: record.aggregate_type,
            kind: record.kind.parse()?,
            status: record.status,
            payload: record.payload,
            outbox_status: record.outbox_status.parse()?,
            attempts: record.attempts,
            created_at: record.created_at,
            processed_at: record.processed_at,
        })
    }
}

/// Inserts outbox rows inside the caller's transaction.
///
/// A repeated (saga_id, kind, status) surfaces as [`StoreError::UniqueViolation`]
/// through the `outbox_saga_kind_status` unique index.
pub async fn insert_rows(conn: &mut AsyncPgConnection, rows: &[OutboxRow]) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }
    let records: Vec<OutboxRecord> = rows.iter().map(OutboxRecord::from).collect();

    diesel::insert_into(outbox::table)
        .values(&records)
        .execute(conn)
        .await?;

    Ok(())
}

#[derive(Clone)]
pub struct PgOutbox {
    pool: DbPool,
}

impl PgOutbox {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PgOutbox {
    async fn pending_rows(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRow>, StoreError> {
        let mut conn = self.pool.get().await?;

        let records = outbox::table
            .filter(outbox::outbox_status.eq(OutboxStatus::Started.as_str()))
            .filter(outbox::created_at.le(created_before))
            .order(outbox::created_at.asc())
            .limit(limit as i64)
            .load::<OutboxRecord>(&mut conn)
            .await?;

        records.into_iter().map(OutboxRow::try_from).collect()
    }

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(
            outbox::table
                .filter(outbox::id.eq(id))
                .filter(outbox::outbox_status.eq(OutboxStatus::Started.as_str())),
        )
        .set((
            outbox::outbox_status.eq(OutboxStatus::Completed.as_str()),
            outbox::processed_at.eq(Some(at)),
        ))
        .execute(&mut conn)
        .await?;

        Ok(updated > 0)
    }

    async fn record_failed_attempt(&self, id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;

        diesel::update(outbox::table.filter(outbox::id.eq(id)))
            .set(outbox::attempts.eq(outbox::attempts + 1))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn count_stale(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.pool.get().await?;

        let stale: i64 = outbox::table
            .filter(outbox::outbox_status.eq(OutboxStatus::Started.as_str()))
            .filter(outbox::created_at.le(created_before))
            .count()
            .get_result(&mut conn)
            .await?;

        Ok(stale.max(0) as u64)
    }

    async fn purge_published(&self, processed_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.pool.get().await?;

        let purged = diesel::delete(
            outbox::table
                .filter(outbox::outbox_status.eq(OutboxStatus::Completed.as_str()))
                .filter(outbox::processed_at.le(processed_before)),
        )
        .execute(&mut conn)
        .await?;

        Ok(purged as u64)
    }

    async fn find_row(&self, key: &OutboxKey) -> Result<Option<OutboxRow>, StoreError> {
        let mut conn = self.pool.get().await?;

        let record = outbox::table
            .filter(outbox::saga_id.eq(key.saga_id))
            .filter(outbox::kind.eq(key.kind.as_str()))
            .filter(outbox::status.eq(key.status.as_str()))
            .first::<OutboxRecord>(&mut conn)
            .await
            .optional()?;

        record.map(OutboxRow::try_from).transpose()
    }
}
