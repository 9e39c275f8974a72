use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod bus;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod outbox;
pub mod pg;
pub mod telemetry;

pub use bus::{InMemoryBus, KafkaBus, MessageBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use consumer::MessageHandler;
pub use dispatcher::{DispatchReport, DispatchSettings, OutboxDispatcher};
pub use error::{BusError, DomainError, ServiceError, StoreError};
pub use guard::{Admission, Expectation, Recorded};
pub use outbox::{MemoryOutbox, OutboxKey, OutboxKind, OutboxRow, OutboxStatus, OutboxStore};

/// Saga type written on every outbox row of the order processing saga.
pub const ORDER_SAGA_NAME: &str = "OrderProcessingSaga";

pub mod topics {
    pub const ORDER_EVENTS: &str = "order-events";
    pub const PAYMENT_REQUEST: &str = "payment-request";
    pub const PAYMENT_RESPONSE: &str = "payment-response";
    pub const RESTAURANT_APPROVAL_REQUEST: &str = "restaurant-approval-request";
    pub const RESTAURANT_APPROVAL_RESPONSE: &str = "restaurant-approval-response";
}

/// Declares a status enum that travels on the wire and in text columns.
macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(StoreError::Corrupt(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use status_enum;

status_enum!(
    /// Status the order service asks the payment service to reach.
    PaymentOrderStatus { Pending => "PENDING", Cancelled => "CANCELLED" }
);

status_enum!(PaymentStatus {
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
    Failed => "FAILED",
});

status_enum!(RestaurantOrderStatus { Paid => "PAID" });

status_enum!(ApprovalStatus {
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

status_enum!(OrderStatus {
    Pending => "PENDING",
    Paid => "PAID",
    Approved => "APPROVED",
    Cancelling => "CANCELLING",
    Cancelled => "CANCELLED",
});

status_enum!(SagaStatus {
    Started => "STARTED",
    Processing => "PROCESSING",
    Succeeded => "SUCCEEDED",
    Compensating => "COMPENSATING",
    Compensated => "COMPENSATED",
    Failed => "FAILED",
});

/// A message that is written to an outbox before it is published.
pub trait SagaMessage: Serialize {
    const KIND: OutboxKind;

    fn message_id(&self) -> Uuid;
    fn saga_id(&self) -> Uuid;
    /// Domain status carried by the message; part of the outbox uniqueness key.
    fn status_tag(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: Uuid,
    pub saga_id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub price: BigDecimal,
    pub payment_order_status: PaymentOrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub saga_id: Uuid,
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub customer_id: Uuid,
    pub price: BigDecimal,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub failure_messages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedProduct {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantApprovalRequest {
    pub id: Uuid,
    pub saga_id: Uuid,
    pub order_id: Uuid,
    pub restaurant_id: Uuid,
    pub restaurant_order_status: RestaurantOrderStatus,
    pub products: Vec<OrderedProduct>,
    pub price: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantApprovalResponse {
    pub id: Uuid,
    pub saga_id: Uuid,
    pub order_id: Uuid,
    pub restaurant_id: Uuid,
    pub approval_status: ApprovalStatus,
    #[serde(default)]
    pub failure_messages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Customer-facing notification of an order status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub id: Uuid,
    pub saga_id: Uuid,
    pub order_id: Uuid,
    pub tracking_id: Uuid,
    pub order_status: OrderStatus,
    #[serde(default)]
    pub failure_messages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl SagaMessage for PaymentRequest {
    const KIND: OutboxKind = OutboxKind::PaymentRequest;

    fn message_id(&self) -> Uuid {
        self.id
    }

    fn saga_id(&self) -> Uuid {
        self.saga_id
    }

    fn status_tag(&self) -> &'static str {
        self.payment_order_status.as_str()
    }
}

impl SagaMessage for PaymentResponse {
    const KIND: OutboxKind = OutboxKind::PaymentResponse;

    fn message_id(&self) -> Uuid {
        self.id
    }

    fn saga_id(&self) -> Uuid {
        self.saga_id
    }

    fn status_tag(&self) -> &'static str {
        self.payment_status.as_str()
    }
}

impl SagaMessage for RestaurantApprovalRequest {
    const KIND: OutboxKind = OutboxKind::RestaurantApprovalRequest;

    fn message_id(&self) -> Uuid {
        self.id
    }

    fn saga_id(&self) -> Uuid {
        self.saga_id
    }

    fn status_tag(&self) -> &'static str {
        self.restaurant_order_status.as_str()
    }
}

impl SagaMessage for RestaurantApprovalResponse {
    const KIND: OutboxKind = OutboxKind::RestaurantApprovalResponse;

    fn message_id(&self) -> Uuid {
        self.id
    }

    fn saga_id(&self) -> Uuid {
        self.saga_id
    }

    fn status_tag(&self) -> &'static str {
        self.approval_status.as_str()
    }
}

impl SagaMessage for OrderStatusEvent {
    const KIND: OutboxKind = OutboxKind::OrderEvent;

    fn message_id(&self) -> Uuid {
        self.id
    }

    fn saga_id(&self) -> Uuid {
        self.saga_id
    }

    fn status_tag(&self) -> &'static str {
        self.order_status.as_str()
    }
}

/// Joins failure messages for a single text column. Commas and backslashes
/// inside a message are escaped with a backslash.
pub fn join_messages(messages: &[String]) -> String {
    messages
        .iter()
        .map(|m| m.replace('\\', "\\\\").replace(',', "\\,"))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_messages(joined: &str) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current = String::new();
    let mut chars = joined.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => current.extend(chars.next()),
            ',' => messages.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    messages.push(current);
    messages.retain(|m| !m.is_empty());
    messages
}
