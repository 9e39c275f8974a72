pub mod api;
pub mod domain;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod saga;
pub mod schema;

pub use domain::{DeliveryAddress, Order, OrderEvent, OrderItem, PlaceOrder, PlaceOrderItem};
pub use handlers::ResponseListener;
pub use memory::InMemoryOrderStore;
pub use postgres::PgOrderStore;
pub use repository::OrderRepository;
pub use saga::{OrderPaymentSaga, PlacedOrder, SagaOrchestrator};
