//! Stock reconciliation server
//!
//! Serves the purchase and inventory API over HTTP. Uses PostgreSQL when a
//! database URL is configured and an in-memory store otherwise.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stock_reconciliation::{
    create_app,
    services::LogNotifier,
    store::{MemoryStore, PgStore, ReconciliationStore},
    AppState, Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "recon_server=debug,stock_reconciliation=debug,tower_http=debug,sqlx=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting stock reconciliation server");
    tracing::info!("Environment: {}", config.environment);

    let store: Arc<dyn ReconciliationStore> = if config.uses_database() {
        tracing::info!("Connecting to database...");
        let db_pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.database.url)
            .await?;
        tracing::info!("Database connection established");

        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");

        Arc::new(PgStore::new(db_pool))
    } else {
        tracing::warn!("No database URL configured; using the in-memory store");
        Arc::new(MemoryStore::new())
    };

    let state = AppState::new(store, Arc::new(LogNotifier), config.clone());
    let app = create_app(state);

    // Start server
    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
