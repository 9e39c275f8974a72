use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{join_messages, split_messages, StoreError};
use uuid::Uuid;

use crate::domain::{Product, Restaurant, RestaurantApproval};
use crate::schema::{order_approvals, restaurant_products, restaurants};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = restaurants)]
pub struct RestaurantRecord {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = restaurant_products)]
pub struct ProductRecord {
    pub restaurant_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub available: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = order_approvals)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub saga_id: Uuid,
    pub order_id: Uuid,
    pub restaurant_id: Uuid,
    pub approval_status: String,
    pub failure_messages: String,
    pub created_at: DateTime<Utc>,
}

impl RestaurantRecord {
    pub fn into_restaurant(self, products: Vec<ProductRecord>) -> Restaurant {
        Restaurant::new(
            self.id,
            self.name,
            self.active,
            products
                .into_iter()
                .map(|p| Product {
                    id: p.product_id,
                    name: p.name,
                    price: p.price,
                    available: p.available,
                })
                .collect(),
        )
    }
}

pub fn restaurant_records(restaurant: &Restaurant) -> (RestaurantRecord, Vec<ProductRecord>) {
    let record = RestaurantRecord {
        id: restaurant.id,
        name: restaurant.name.clone(),
        active: restaurant.active,
    };
    let products = restaurant
        .products
        .values()
        .map(|p| ProductRecord {
            restaurant_id: restaurant.id,
            product_id: p.id,
            name: p.name.clone(),
            price: p.price.clone(),
            available: p.available,
        })
        .collect();
    (record, products)
}

impl From<&RestaurantApproval> for ApprovalRecord {
    fn from(approval: &RestaurantApproval) -> Self {
        Self {
            id: approval.id,
            saga_id: approval.saga_id,
            order_id: approval.order_id,
            restaurant_id: approval.restaurant_id,
            approval_status: approval.status.as_str().to_string(),
            failure_messages: join_messages(&approval.failure_messages),
            created_at: approval.created_at,
        }
    }
}

impl TryFrom<ApprovalRecord> for RestaurantApproval {
    type Error = StoreError;

    fn try_from(record: ApprovalRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            order_id: record.order_id,
            saga_id: record.saga_id,
            restaurant_id: record.restaurant_id,
            status: record.approval_status.parse()?,
            failure_messages: split_messages(&record.failure_messages),
            created_at: record.created_at,
        })
    }
}
