//! Purchase-to-inventory stock reconciliation engine
//!
//! Keeps per-variant stock counts consistent with the lifecycle of purchase
//! orders while maintaining an append-only ledger of stock movements.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod store;

pub use config::{Config, ReconciliationConfig};
pub use error::{AppError, AppResult};

use services::{LogNotifier, NotificationSink, PurchaseService, StockLedger};
use store::{MemoryStore, ReconciliationStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReconciliationStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        notifier: Arc<dyn NotificationSink>,
        config: Config,
    ) -> Self {
        Self {
            store,
            notifier,
            config: Arc::new(config),
        }
    }

    /// State backed by a fresh in-memory store and the log notifier
    pub fn in_memory(config: Config) -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(LogNotifier), config)
    }

    pub fn purchase_service(&self) -> PurchaseService {
        PurchaseService::new(
            self.store.clone(),
            self.notifier.clone(),
            &self.config.reconciliation,
        )
    }

    pub fn stock_ledger(&self) -> StockLedger {
        StockLedger::new(self.store.clone(), &self.config.reconciliation)
    }
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
    "Stock Reconciliation API v1"
}
