//! Route definitions for the fulfillment engine API

use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Trade lifecycle, allocation and deliveries
        .nest("/trades", trade_routes())
        // Invoice preview, invoices and consolidation periods
        .route("/invoice-target", get(handlers::get_invoice_target))
        .nest("/invoices", invoice_routes())
        .nest("/invoice-periods", period_routes())
}

/// Trade routes
fn trade_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_trade))
        .route(
            "/:trade_id",
            get(handlers::get_trade).put(handlers::amend_trade),
        )
        .route("/:trade_id/submit", post(handlers::submit_trade))
        .route("/:trade_id/approve", post(handlers::approve_trade))
        .route("/:trade_id/reject", post(handlers::reject_trade))
        .route("/:trade_id/return-to-draft", post(handlers::return_trade_to_draft))
        .route("/:trade_id/cancel", post(handlers::cancel_trade))
        .route(
            "/:trade_id/financing-complete",
            post(handlers::mark_financing_complete),
        )
        .route("/:trade_id/release", post(handlers::release_for_delivery))
        .route("/:trade_id/complete", post(handlers::complete_trade))
        .route(
            "/:trade_id/allocation",
            get(handlers::get_allocation).post(handlers::allocate_vouchers),
        )
        .route(
            "/:trade_id/deliveries",
            get(handlers::list_deliveries).post(handlers::record_delivery),
        )
        .route("/:trade_id/progress", get(handlers::get_delivery_progress))
}

/// Invoice routes
fn invoice_routes() -> Router<AppState> {
    Router::new()
        .route("/:invoice_id", get(handlers::get_invoice))
        .route("/:invoice_id/payments", post(handlers::record_invoice_payment))
}

/// Consolidation period routes
fn period_routes() -> Router<AppState> {
    Router::new()
        .route("/close-due", post(handlers::close_due_periods))
        .route("/:period_id", get(handlers::get_invoice_period))
}
