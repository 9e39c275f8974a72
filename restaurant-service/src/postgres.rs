use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::{AsyncConnection, RunQueryDsl};
use shared::pg::{insert_rows, DbPool, PgOutbox};
use shared::{OutboxKey, OutboxRow, OutboxStore, StoreError};
use uuid::Uuid;

use crate::domain::{Restaurant, RestaurantApproval};
use crate::models::{restaurant_records, ApprovalRecord, ProductRecord, RestaurantRecord};
use crate::repository::ApprovalRepository;
use crate::schema::{order_approvals, restaurant_products, restaurants};

#[derive(Clone)]
pub struct PgApprovalStore {
    pool: DbPool,
    outbox: PgOutbox,
}

impl PgApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            outbox: PgOutbox::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl ApprovalRepository for PgApprovalStore {
    async fn find_approval_by_saga(&self, saga_id: Uuid) -> Result<Option<RestaurantApproval>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record = order_approvals::table
            .filter(order_approvals::saga_id.eq(saga_id))
            .select(ApprovalRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        record.map(RestaurantApproval::try_from).transpose()
    }

    async fn find_restaurant(&self, restaurant_id: Uuid) -> Result<Option<Restaurant>, StoreError> {
        let mut conn = self.pool.get().await?;
        let Some(record) = restaurants::table
            .find(restaurant_id)
            .select(RestaurantRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?
        else {
            return Ok(None);
        };

        let products = restaurant_products::table
            .filter(restaurant_products::restaurant_id.eq(restaurant_id))
            .select(ProductRecord::as_select())
            .load(&mut conn)
            .await?;
        Ok(Some(record.into_restaurant(products)))
    }

    async fn save_restaurant(&self, restaurant: &Restaurant) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let (record, products) = restaurant_records(restaurant);

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(restaurants::table)
                    .values(&record)
                    .on_conflict(restaurants::id)
                    .do_update()
                    .set((
                        restaurants::name.eq(excluded(restaurants::name)),
                        restaurants::active.eq(excluded(restaurants::active)),
                    ))
                    .execute(conn)
                    .await?;

                diesel::delete(
                    restaurant_products::table.filter(restaurant_products::restaurant_id.eq(record.id)),
                )
                .execute(conn)
                .await?;

                if !products.is_empty() {
                    diesel::insert_into(restaurant_products::table)
                        .values(&products)
                        .execute(conn)
                        .await?;
                }

                Ok(())
            })
        })
        .await
    }

    async fn insert_approval(
        &self,
        approval: &RestaurantApproval,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let record = ApprovalRecord::from(approval);

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(order_approvals::table)
                    .values(&record)
                    .execute(conn)
                    .await?;

                insert_rows(conn, &outbox).await
            })
        })
        .await
    }
}

#[async_trait]
impl OutboxStore for PgApprovalStore {
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
