use event_bus::{EventBus, InMemoryBus, NatsBus};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use outbox_rs::{
    config::{BusType, Config, StoreType},
    db,
    metrics::OutboxMetrics,
    routes::{build_router, AppState},
    run_publisher_task, InMemoryOutboxStore, OutboxStore, PgOutboxStore, RetentionSweeper,
};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting outbox service...");

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        "Configuration loaded: host={}, port={}, store_type={:?}, bus_type={:?}",
        config.host,
        config.port,
        config.store_type,
        config.bus_type
    );

    // Create outbox store
    let store: Arc<dyn OutboxStore> = match config.store_type {
        StoreType::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL is required for the postgres store");

            tracing::info!("Connecting to database...");
            let pool = db::init_pool(database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running migrations...");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run migrations");

            Arc::new(PgOutboxStore::new(pool).with_defaults(config.producer.clone()))
        }
        StoreType::InMemory => {
            tracing::warn!("Using InMemory outbox store; records do not survive a restart");
            Arc::new(InMemoryOutboxStore::new().with_defaults(config.producer.clone()))
        }
    };

    // Create event bus
    let bus: Arc<dyn EventBus> = match config.bus_type {
        BusType::InMemory => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
        BusType::Nats => {
            tracing::info!("Connecting to NATS at {}", config.nats_url);
            let client = async_nats::connect(&config.nats_url)
                .await
                .expect("Failed to connect to NATS");
            Arc::new(NatsBus::new(client))
        }
    };

    let metrics = OutboxMetrics::new().expect("Failed to register metrics");
    let cancel = CancellationToken::new();

    // Start background publisher and retention sweeper
    let publisher = tokio::spawn(run_publisher_task(
        store.clone(),
        bus.clone(),
        config.publisher.clone(),
        metrics.clone(),
        cancel.child_token(),
    ));

    let sweeper = tokio::spawn(
        RetentionSweeper::new(store.clone(), config.sweeper.clone())
            .with_metrics(metrics.clone())
            .run(cancel.child_token()),
    );

    let state = Arc::new(AppState { store, metrics });

    // Build the application router
    let app = build_router(state).layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    // Bind to the configured address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid HOST/PORT");
    tracing::info!("Outbox service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    // Start the server; ctrl-c stops the HTTP listener and both loops
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await
        .expect("Server failed to start");

    cancel.cancel();
    let (publisher, sweeper) = tokio::join!(publisher, sweeper);
    log_task_exit("publisher", publisher);
    log_task_exit("sweeper", sweeper);
    tracing::info!("Outbox service stopped");
}

/// Log a background task that panicked or was aborted; returns whether it did
fn log_task_exit(task: &str, result: Result<(), JoinError>) -> bool {
    match result {
        Ok(()) => false,
        Err(e) => {
            tracing::error!(task, panicked = e.is_panic(), error = %e, "Background task failed");
            true
        }
    }
}
