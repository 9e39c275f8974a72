pub mod domain;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod schema;

pub use domain::{Product, Restaurant, RestaurantApproval};
pub use handlers::ApprovalRequestHandler;
pub use memory::InMemoryApprovalStore;
pub use postgres::PgApprovalStore;
pub use repository::ApprovalRepository;
