//! Grain trade fulfillment engine
//!
//! Drives a trade from draft to completion: approval and the automatic
//! advance, voucher allocation, partial multi-batch delivery against the
//! ordered quantity, and invoicing on the buyer's payment-terms schedule.

pub mod config;
pub mod error;
pub mod external;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use config::Config;
pub use services::Engine;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub config: Arc<Config>,
    /// Present when running on PostgreSQL
    pub db: Option<sqlx::PgPool>,
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Grain Trade Fulfillment Engine API v1"
}
