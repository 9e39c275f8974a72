use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::pg::{insert_rows, DbPool, PgOutbox};
use shared::{join_messages, OutboxKey, OutboxRow, OutboxStore, StoreError};
use uuid::Uuid;

use crate::domain::Order;
use crate::models::{item_records, OrderItemRecord, OrderRecord, SagaRecord};
use crate::repository::OrderRepository;
use crate::saga::OrderPaymentSaga;
use crate::schema::{order_items, order_sagas, orders};

#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
    outbox: PgOutbox,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            outbox: PgOutbox::new(pool.clone()),
            pool,
        }
    }

    async fn load_order(
        conn: &mut AsyncPgConnection,
        record: Option<OrderRecord>,
    ) -> Result<Option<Order>, StoreError> {
        let Some(record) = record else {
            return Ok(None);
        };
        let items = order_items::table
            .filter(order_items::order_id.eq(record.id))
            .order(order_items::item_id.asc())
            .select(OrderItemRecord::as_select())
            .load(conn)
            .await?;
        record.into_order(items).map(Some)
    }
}

#[async_trait]
impl OrderRepository for PgOrderStore {
    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record = orders::table
            .find(order_id)
            .select(OrderRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Self::load_order(&mut conn, record).await
    }

    async fn find_order_by_tracking_id(&self, tracking_id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record = orders::table
            .filter(orders::tracking_id.eq(tracking_id))
            .select(OrderRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Self::load_order(&mut conn, record).await
    }

    async fn find_saga(&self, saga_id: Uuid) -> Result<Option<OrderPaymentSaga>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record = order_sagas::table
            .find(saga_id)
            .select(SagaRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        record.map(OrderPaymentSaga::try_from).transpose()
    }

    async fn insert_order(
        &self,
        order: &Order,
        saga: &OrderPaymentSaga,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let order_record = OrderRecord::from(order);
        let items = item_records(order);
        let saga_record = SagaRecord::from(saga);

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(orders::table)
                    .values(&order_record)
                    .execute(conn)
                    .await?;

                diesel::insert_into(order_items::table)
                    .values(&items)
                    .execute(conn)
                    .await?;

                diesel::insert_into(order_sagas::table)
                    .values(&saga_record)
                    .execute(conn)
                    .await?;

                insert_rows(conn, &outbox).await
            })
        })
        .await
    }

    async fn save_transition(
        &self,
        order: &Order,
        saga: &OrderPaymentSaga,
        expected_version: i32,
        outbox: Vec<OutboxRow>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let order_id = order.id;
        let order_status = order.status.as_str();
        let failure_messages = join_messages(&order.failure_messages);
        let saga_record = SagaRecord::from(saga);

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let updated = diesel::update(
                    order_sagas::table
                        .filter(order_sagas::id.eq(saga_record.id))
                        .filter(order_sagas::version.eq(expected_version)),
                )
                .set((
                    order_sagas::saga_status.eq(&saga_record.saga_status),
                    order_sagas::last_event_id.eq(saga_record.last_event_id),
                    order_sagas::version.eq(saga_record.version),
                    order_sagas::updated_at.eq(saga_record.updated_at),
                ))
                .execute(conn)
                .await?;

                if updated == 0 {
                    return Err(StoreError::Conflict(format!("saga {}", saga_record.id)));
                }

                diesel::update(orders::table.find(order_id))
                    .set((
                        orders::order_status.eq(order_status),
                        orders::failure_messages.eq(&failure_messages),
                    ))
                    .execute(conn)
                    .await?;

                insert_rows(conn, &outbox).await
            })
        })
        .await
    }
}

#[async_trait]
impl OutboxStore for PgOrderStore {
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
