use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use shared::{DomainError, OrderStatus};
use uuid::Uuid;

const ENTITY: &str = "Order";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub postal_code: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub item_id: i32,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
    pub subtotal: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
    pub subtotal: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub price: BigDecimal,
    pub items: Vec<PlaceOrderItem>,
    pub address: DeliveryAddress,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub tracking_id: Uuid,
    pub address: DeliveryAddress,
    pub price: BigDecimal,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub failure_messages: Vec<String>,
}

/// Status change of an order, produced by every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub order_id: Uuid,
    pub tracking_id: Uuid,
    pub status: OrderStatus,
    pub failure_messages: Vec<String>,
}

impl Order {
    /// Validates the command and creates a PENDING order.
    pub fn place(cmd: PlaceOrder) -> Result<(Order, OrderEvent), DomainError> {
        validate(&cmd)?;

        let items = cmd
            .items
            .into_iter()
            .enumerate()
            .map(|(i, item)| OrderItem {
                item_id: i as i32 + 1,
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
                subtotal: item.subtotal,
            })
            .collect();

        let order = Order {
            id: Uuid::new_v4(),
            customer_id: cmd.customer_id,
            restaurant_id: cmd.restaurant_id,
            tracking_id: Uuid::new_v4(),
            address: cmd.address,
            price: cmd.price,
            items,
            status: OrderStatus::Pending,
            failure_messages: Vec::new(),
        };
        let event = order.event();
        Ok((order, event))
    }

    pub fn pay(&mut self) -> Result<OrderEvent, DomainError> {
        self.require(&[OrderStatus::Pending], "pay")?;
        self.status = OrderStatus::Paid;
        Ok(self.event())
    }

    pub fn approve(&mut self) -> Result<OrderEvent, DomainError> {
        self.require(&[OrderStatus::Paid], "approve")?;
        self.status = OrderStatus::Approved;
        Ok(self.event())
    }

    pub fn init_cancel(&mut self, reasons: Vec<String>) -> Result<OrderEvent, DomainError> {
        self.require(&[OrderStatus::Paid], "start cancelling")?;
        self.status = OrderStatus::Cancelling;
        self.add_failure_messages(reasons);
        Ok(self.event())
    }

    pub fn cancel(&mut self, reasons: Vec<String>) -> Result<OrderEvent, DomainError> {
        self.require(&[OrderStatus::Pending, OrderStatus::Cancelling], "cancel")?;
        self.status = OrderStatus::Cancelled;
        self.add_failure_messages(reasons);
        Ok(self.event())
    }

    /// Records reasons without moving the order.
    pub fn add_failure_messages(&mut self, reasons: Vec<String>) {
        self.failure_messages
            .extend(reasons.into_iter().filter(|r| !r.is_empty()));
    }

    fn require(&self, from: &[OrderStatus], action: &str) -> Result<(), DomainError> {
        if from.contains(&self.status) {
            Ok(())
        } else {
            Err(DomainError::violation(
                ENTITY,
                self.id,
                format!("cannot {} an order in status {}", action, self.status),
            ))
        }
    }

    fn event(&self) -> OrderEvent {
        OrderEvent {
            order_id: self.id,
            tracking_id: self.tracking_id,
            status: self.status,
            failure_messages: self.failure_messages.clone(),
        }
    }
}

fn validate(cmd: &PlaceOrder) -> Result<(), DomainError> {
    if cmd.price <= BigDecimal::zero() {
        return Err(DomainError::OrderValidation(
            "total price must be greater than zero".to_string(),
        ));
    }
    if cmd.items.is_empty() {
        return Err(DomainError::OrderValidation(
            "an order needs at least one item".to_string(),
        ));
    }

    let mut total = BigDecimal::zero();
    for item in &cmd.items {
        if item.quantity <= 0 {
            return Err(DomainError::OrderValidation(format!(
                "quantity of product {} must be greater than zero",
                item.product_id
            )));
        }
        if item.price <= BigDecimal::zero() {
            return Err(DomainError::OrderValidation(format!(
                "price of product {} must be greater than zero",
                item.product_id
            )));
        }
        let expected = &item.price * BigDecimal::from(item.quantity);
        if item.subtotal != expected {
            return Err(DomainError::OrderValidation(format!(
                "subtotal {} of product {} does not match {} x {}",
                item.subtotal, item.product_id, item.price, item.quantity
            )));
        }
        total += &item.subtotal;
    }

    if total != cmd.price {
        return Err(DomainError::OrderValidation(format!(
            "total price {} does not match item total {}",
            cmd.price, total
        )));
    }
    Ok(())
}
