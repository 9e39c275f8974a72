use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{join_messages, split_messages, StoreError};
use uuid::Uuid;

use crate::domain::{DeliveryAddress, Order, OrderItem};
use crate::saga::OrderPaymentSaga;
use crate::schema::{order_items, order_sagas, orders};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = orders)]
pub struct OrderRecord {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub tracking_id: Uuid,
    pub price: BigDecimal,
    pub order_status: String,
    pub failure_messages: String,
    pub street: String,
    pub postal_code: String,
    pub city: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = order_items)]
pub struct OrderItemRecord {
    pub order_id: Uuid,
    pub item_id: i32,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
    pub subtotal: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = order_sagas)]
pub struct SagaRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub saga_status: String,
    pub last_event_id: Option<Uuid>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderRecord {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            customer_id: order.customer_id,
            restaurant_id: order.restaurant_id,
            tracking_id: order.tracking_id,
            price: order.price.clone(),
            order_status: order.status.as_str().to_string(),
            failure_messages: join_messages(&order.failure_messages),
            street: order.address.street.clone(),
            postal_code: order.address.postal_code.clone(),
            city: order.address.city.clone(),
        }
    }
}

impl OrderRecord {
    pub fn into_order(self, items: Vec<OrderItemRecord>) -> Result<Order, StoreError> {
        Ok(Order {
            id: self.id,
            customer_id: self.customer_id,
            restaurant_id: self.restaurant_id,
            tracking_id: self.tracking_id,
            address: DeliveryAddress {
                street: self.street,
                postal_code: self.postal_code,
                city: self.city,
            },
            price: self.price,
            items: items
                .into_iter()
                .map(|item| OrderItem {
                    item_id: item.item_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                    subtotal: item.subtotal,
                })
                .collect(),
            status: self.order_status.parse()?,
            failure_messages: split_messages(&self.failure_messages),
        })
    }
}

pub fn item_records(order: &Order) -> Vec<OrderItemRecord> {
    order
        .items
        .iter()
        .map(|item| OrderItemRecord {
            order_id: order.id,
            item_id: item.item_id,
            product_id: item.product_id,
            quantity: item.quantity,
            price: item.price.clone(),
            subtotal: item.subtotal.clone(),
        })
        .collect()
}

impl From<&OrderPaymentSaga> for SagaRecord {
    fn from(saga: &OrderPaymentSaga) -> Self {
        Self {
            id: saga.id,
            order_id: saga.order_id,
            saga_status: saga.status.as_str().to_string(),
            last_event_id: saga.last_event_id,
            version: saga.version,
            created_at: saga.created_at,
            updated_at: saga.updated_at,
        }
    }
}

impl TryFrom<SagaRecord> for OrderPaymentSaga {
    type Error = StoreError;

    fn try_from(record: SagaRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            order_id: record.order_id,
            status: record.saga_status.parse()?,
            last_event_id: record.last_event_id,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
