//! Order lifecycle and delivery assignment engine for an on-demand
//! delivery marketplace: carts, checkout, the order state machine, atomic
//! courier claims and realtime tracking.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        // Cart API (customer)
        .route("/cart", get(handlers::carts::get_cart))
        .route("/cart", axum::routing::delete(handlers::carts::clear_cart))
        .route(
            "/cart/items",
            axum::routing::post(handlers::carts::add_cart_item),
        )
        .route(
            "/cart/items/:listing_id",
            axum::routing::put(handlers::carts::update_cart_item),
        )
        .route(
            "/cart/items/:listing_id",
            axum::routing::delete(handlers::carts::remove_cart_item),
        )
        // Checkout
        .route(
            "/checkout",
            axum::routing::post(handlers::checkout::checkout),
        )
        // Orders API (role-scoped)
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/number/:order_number",
            get(handlers::orders::get_order_by_number),
        )
        .route(
            "/orders/:id/history",
            get(handlers::orders::get_order_history),
        )
        .route(
            "/orders/:id/status",
            axum::routing::put(handlers::orders::update_order_status),
        )
        .route(
            "/orders/:id/cancel",
            axum::routing::post(handlers::orders::cancel_order),
        )
        // Delivery assignment API (courier, plus operator reassignment)
        .route(
            "/deliveries/available",
            get(handlers::deliveries::available_deliveries),
        )
        .route(
            "/deliveries/:order_id/claim",
            axum::routing::post(handlers::deliveries::claim_delivery),
        )
        .route(
            "/deliveries/:order_id/release",
            axum::routing::post(handlers::deliveries::release_delivery),
        )
        .route(
            "/deliveries/:order_id/reassign",
            axum::routing::post(handlers::deliveries::reassign_delivery),
        )
        // Realtime tracking
        .route(
            "/orders/:id/location",
            axum::routing::post(handlers::tracking::report_location),
        )
        .route("/orders/:id/events", get(handlers::tracking::order_events))
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let version = env!("CARGO_PKG_VERSION");
    let git = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_time = option_env!("BUILD_TIME").unwrap_or("unknown");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "git": git,
        "build_time": build_time,
        "service": "dispatch-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "environment": std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    // Check database connectivity
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
