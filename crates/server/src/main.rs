use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convertd_core::{
    load_config, validate_config, Converter, FfmpegConverter, InMemoryCache, SqliteTaskStore,
    TaskCache, TaskEngine, TaskStore,
};
use convertd_server::api::create_router;
use convertd_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("CONVERTD_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run() -> Result<()> {
    init_tracing();

    // Determine config path
    let config_path = std::env::var("CONVERTD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Output directory: {:?}", config.files.output_dir);

    // Create SQLite task store
    let task_store: Arc<dyn TaskStore> = Arc::new(
        SqliteTaskStore::new(&config.database.path).context("Failed to create task store")?,
    );
    info!("Task store initialized");

    // Create fast cache and its purge loop
    let memory_cache = Arc::new(InMemoryCache::new());
    let background = CancellationToken::new();
    let purge_handle = tokio::spawn(purge_cache(
        Arc::clone(&memory_cache),
        config.cache.purge_interval(),
        background.clone(),
    ));
    let task_cache = TaskCache::new(memory_cache, config.cache.ttl());

    tokio::fs::create_dir_all(&config.files.output_dir)
        .await
        .with_context(|| format!("Failed to create output dir {:?}", config.files.output_dir))?;

    // Create converter. A missing ffmpeg is reported but does not stop the
    // service; conversions fail individually until it is installed.
    let converter: Arc<dyn Converter> = Arc::new(FfmpegConverter::new(config.converter.clone()));
    match converter.validate().await {
        Ok(()) => info!("Using converter: {}", converter.name()),
        Err(e) => warn!("Converter not ready: {}", e),
    }

    // Create and start the task engine
    let engine = Arc::new(TaskEngine::new(
        config.engine.clone(),
        config.files.output_dir.clone(),
        Arc::clone(&task_store),
        task_cache,
        converter,
    ));
    engine.start().await;

    // Create app state and router
    let state = Arc::new(AppState::new(Arc::clone(&engine), task_store));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    // Stop the engine even if the server failed
    info!("Stopping task engine...");
    engine.stop().await;

    background.cancel();
    let _ = purge_handle.await;
    info!("Server shut down");

    served
}

/// Periodically drop expired cache entries.
async fn purge_cache(
    cache: Arc<InMemoryCache>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    debug!(purged, "Purged expired cache entries");
                }
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
