#![allow(dead_code)]

use bigdecimal::BigDecimal;
use order_service::{DeliveryAddress, PlaceOrder, PlaceOrderItem};
use uuid::Uuid;

/// Two units of `product_id` at 50 each.
pub fn place_order(restaurant_id: Uuid, product_id: Uuid) -> PlaceOrder {
    PlaceOrder {
        customer_id: Uuid::new_v4(),
        restaurant_id,
        price: BigDecimal::from(100),
        items: vec![PlaceOrderItem {
            product_id,
            quantity: 2,
            price: BigDecimal::from(50),
            subtotal: BigDecimal::from(100),
        }],
        address: DeliveryAddress {
            street: "street_1".to_string(),
            postal_code: "1000AB".to_string(),
            city: "Paris".to_string(),
        },
    }
}

pub fn any_order() -> PlaceOrder {
    place_order(Uuid::new_v4(), Uuid::new_v4())
}
