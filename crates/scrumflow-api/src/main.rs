//! scrumflow-api server binary.
//!
//! Starts the HTTP API and push gateway, connects the event bus and runs the
//! consumer pipeline in the same process.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrumflow_api::{app, ApiConfig, AppState, Gateway, InMemoryRegistry};
use scrumflow_bus::{AmqpLogQueue, BusBackend, BusConfig, InMemoryLogQueue, LogQueue, LogQueueConfig};
use scrumflow_db::{Database, PoolConfig};
use scrumflow_jobs::{HttpSprintSource, Pipeline, PipelineConfig, SyncConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "scrumflow_api=debug,scrumflow_jobs=debug,scrumflow_bus=info,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("scrumflow-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = ApiConfig::from_env()?;
    if config.jwt_secret.is_none() {
        warn!("JWT_SECRET is not set, every gateway connection will be rejected");
    }

    info!("Connecting to database...");
    let db = Database::connect_with_config(&config.database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    let bus_config = BusConfig::from_env()?;
    let bus = scrumflow_bus::connect(&bus_config).await?;
    info!(backend = bus.backend(), "Event bus connected");

    let log_queue: Arc<dyn LogQueue> = match bus_config.backend {
        BusBackend::Amqp => Arc::new(AmqpLogQueue::connect(LogQueueConfig::from_env()).await?),
        BusBackend::Memory => Arc::new(InMemoryLogQueue::new()),
    };

    let gateway = Gateway::new(
        Arc::new(InMemoryRegistry::new()),
        config.jwt_secret.as_deref(),
    );
    let sprint_source = Arc::new(HttpSprintSource::new(SyncConfig::from_env())?);
    let pipeline_config = PipelineConfig::from_env()?;

    let state = AppState::new(
        db.clone(),
        bus.clone(),
        gateway.clone(),
        sprint_source,
        log_queue.clone(),
        pipeline_config.drain.clone(),
    );

    let pipeline = Pipeline::new(bus, db, Arc::new(gateway), pipeline_config)
        .with_log_queue(log_queue)
        .start()
        .await?;

    let app = app(state, config.allowed_origins.clone());

    let addr = config.socket_addr()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, shutting down consumers");
    pipeline.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
