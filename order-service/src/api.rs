use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::{DomainError, OrderStatus, ServiceError};
use uuid::Uuid;

use crate::domain::PlaceOrder;
use crate::repository::OrderRepository;
use crate::saga::SagaOrchestrator;

pub struct AppState<R> {
    pub orchestrator: Arc<SagaOrchestrator<R>>,
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_tracking_id: Uuid,
    pub order_status: OrderStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrackOrderResponse {
    pub order_tracking_id: Uuid,
    pub order_status: OrderStatus,
    pub failure_messages: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn create_router<R: OrderRepository + 'static>(state: AppState<R>) -> Router {
    Router::new()
        .route("/orders", post(create_order::<R>))
        .route("/orders/:tracking_id", get(track_order::<R>))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_order<R: OrderRepository + 'static>(
    State(state): State<AppState<R>>,
    Json(request): Json<PlaceOrder>,
) -> Result<Json<CreateOrderResponse>, ApiError> {
    match state.orchestrator.place_order(request).await {
        Ok(placed) => {
            tracing::info!("Started saga {} for order {}", placed.saga_id, placed.order_id);
            Ok(Json(CreateOrderResponse {
                order_tracking_id: placed.tracking_id,
                order_status: placed.status,
                message: "Order created successfully".to_string(),
            }))
        }
        Err(e) => Err(error_response(e)),
    }
}

pub async fn track_order<R: OrderRepository + 'static>(
    State(state): State<AppState<R>>,
    Path(tracking_id): Path<Uuid>,
) -> Result<Json<TrackOrderResponse>, ApiError> {
    let order = state
        .orchestrator
        .find_by_tracking_id(tracking_id)
        .await
        .map_err(error_response)?;

    Ok(Json(TrackOrderResponse {
        order_tracking_id: order.tracking_id,
        order_status: order.status,
        failure_messages: order.failure_messages,
    }))
}

pub async fn health_check() -> &'static str {
    "OK"
}

fn error_response(e: ServiceError) -> ApiError {
    let status = match &e {
        ServiceError::Domain(DomainError::OrderValidation(_)) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => {
            tracing::error!("Order request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}
