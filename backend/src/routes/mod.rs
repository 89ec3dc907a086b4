//! Route definitions for the stock reconciliation API

use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/purchases", purchase_routes())
        .nest("/inventory", inventory_routes())
}

/// Purchase lifecycle routes
fn purchase_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_purchases).post(handlers::create_purchase),
        )
        .route(
            "/:purchase_id",
            get(handlers::get_purchase)
                .put(handlers::update_purchase)
                .delete(handlers::delete_purchase),
        )
        .route("/:purchase_id/returns", post(handlers::create_return))
}

/// Stock projection, ledger and audit routes
fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/variants",
            get(handlers::list_variants).post(handlers::create_variant),
        )
        .route("/variants/:variant_id/stock", get(handlers::get_variant_stock))
        .route(
            "/variants/:variant_id/movements",
            get(handlers::get_variant_movements),
        )
        .route("/adjustments", post(handlers::adjust_stock))
        .route("/audit", get(handlers::audit_all))
        .route("/audit/:variant_id", get(handlers::audit_variant))
}
