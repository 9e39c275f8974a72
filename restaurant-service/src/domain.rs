use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::Deserialize;
use shared::{ApprovalStatus, Recorded, RestaurantApprovalRequest, RestaurantApprovalResponse};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Restaurant {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub products: HashMap<Uuid, Product>,
}

impl Restaurant {
    pub fn new(id: Uuid, name: impl Into<String>, active: bool, products: Vec<Product>) -> Self {
        Self {
            id,
            name: name.into(),
            active,
            products: products.into_iter().map(|p| (p.id, p)).collect(),
        }
    }
}

/// The restaurant's answer to one order, made once per saga.
#[derive(Debug, Clone, PartialEq)]
pub struct RestaurantApproval {
    pub id: Uuid,
    pub order_id: Uuid,
    pub saga_id: Uuid,
    pub restaurant_id: Uuid,
    pub status: ApprovalStatus,
    pub failure_messages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl RestaurantApproval {
    /// Checks the order against the catalogue. Every problem found becomes a
    /// failure message; any problem rejects the order.
    pub fn decide(
        request: &RestaurantApprovalRequest,
        restaurant: Option<&Restaurant>,
        now: DateTime<Utc>,
    ) -> RestaurantApproval {
        let failure_messages = match restaurant {
            None => vec![format!("Restaurant with id {} not found", request.restaurant_id)],
            Some(restaurant) => check(request, restaurant),
        };
        let status = if failure_messages.is_empty() {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };

        RestaurantApproval {
            id: Uuid::new_v4(),
            order_id: request.order_id,
            saga_id: request.saga_id,
            restaurant_id: request.restaurant_id,
            status,
            failure_messages,
            created_at: now,
        }
    }

    pub fn recorded(&self) -> Recorded<ApprovalStatus> {
        Recorded::new(self.status)
    }

    pub fn response(&self, now: DateTime<Utc>) -> RestaurantApprovalResponse {
        RestaurantApprovalResponse {
            id: Uuid::new_v4(),
            saga_id: self.saga_id,
            order_id: self.order_id,
            restaurant_id: self.restaurant_id,
            approval_status: self.status,
            failure_messages: self.failure_messages.clone(),
            created_at: now,
        }
    }
}

fn check(request: &RestaurantApprovalRequest, restaurant: &Restaurant) -> Vec<String> {
    let mut reasons = Vec::new();
    if !restaurant.active {
        reasons.push(format!(
            "Restaurant with id {} is currently not active",
            restaurant.id
        ));
    }

    let mut total = BigDecimal::zero();
    for ordered in &request.products {
        match restaurant.products.get(&ordered.product_id) {
            None => reasons.push(format!("Product with id {} not found", ordered.product_id)),
            Some(product) if !product.available => {
                reasons.push(format!("Product with id {} is not available", product.id))
            }
            Some(product) => total += &product.price * BigDecimal::from(ordered.quantity),
        }
    }

    if reasons.is_empty() && total != request.price {
        reasons.push(format!(
            "Price total is not correct for order {}",
            request.order_id
        ));
    }
    reasons
}
