//! Grain Trade Fulfillment Engine - Server
//!
//! Runs the workflow engine behind the HTTP API together with the periodic
//! invoice-period closing sweep.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use grain_fulfillment::{
    config::StorageBackend,
    create_app,
    error::AppError,
    external::TracingEventSink,
    store::{FulfillmentStore, InventoryQuery, MemoryStore, PgStore},
    AppState, Config, Engine,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gfe_server=debug,grain_fulfillment=debug,tower_http=debug,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load().map_err(|e| AppError::Configuration(e.to_string()))?;

    tracing::info!("Starting Grain Trade Fulfillment Engine");
    tracing::info!("Environment: {}", config.environment);

    let (store, inventory, db) = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            let store = Arc::new(MemoryStore::new());
            (
                store.clone() as Arc<dyn FulfillmentStore>,
                store as Arc<dyn InventoryQuery>,
                None,
            )
        }
        StorageBackend::Postgres => {
            let database = config
                .database
                .as_ref()
                .context("database configuration missing")?;

            // Create database connection pool
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(database.max_connections)
                .min_connections(database.min_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(&database.url)
                .await?;
            tracing::info!("Database connection established");

            // Run migrations in development
            if config.environment == "development" {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("./migrations").run(&pool).await?;
                tracing::info!("Migrations completed");
            }

            let store = Arc::new(PgStore::new(pool.clone()));
            (
                store.clone() as Arc<dyn FulfillmentStore>,
                store as Arc<dyn InventoryQuery>,
                Some(pool),
            )
        }
    };

    let engine = Engine::new(
        store,
        inventory,
        Arc::new(TracingEventSink),
        config.engine.clone(),
    );

    // Period closing sweep
    let sweep_every = config.engine.sweep_interval();
    tracing::info!("Invoice period sweep every {:?}", sweep_every);
    let _sweeper = engine.invoicing().spawn_period_sweeper(sweep_every);

    // Create application state
    let state = AppState {
        engine,
        config: Arc::new(config.clone()),
        db,
    };

    // Build application
    let app = create_app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server.host/server.port")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
