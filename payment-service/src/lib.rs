pub mod domain;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod schema;
pub mod seed;

pub use domain::{CreditEntry, CreditUpdate, Payment};
pub use handlers::PaymentRequestHandler;
pub use memory::InMemoryPaymentStore;
pub use postgres::PgPaymentStore;
pub use repository::PaymentRepository;
