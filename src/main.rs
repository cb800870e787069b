use chain_ingest_service::{
    api,
    blockchain::{scheduler, EthRpcClient, BatchProcessor},
    cache::AddressCache,
    config::Config,
    db,
    metrics::BatchMetrics,
    rate_limit::RateLimiter,
    state::AppState,
};

use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Helper function for shutdown signal handling
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting chain-ingest-service");

    // Load configuration
    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    // Setup database connection
    let db_pool = db::connection::establish_connection(&config.database_url).await?;
    info!("Database connection established");

    // Run migrations and seed the target chain row
    db::migration::run_migrations(&db_pool).await?;
    let chain = db::store::ensure_chain(
        &db_pool,
        &config.chain_id,
        &config.chain_name,
        config.start_block,
    )
    .await?;
    info!(
        "Ingesting chain '{}' (chain id {}), next block {}",
        chain.chain_name, chain.chain_id, chain.next_block_number
    );

    // Shared collaborators, built once and passed explicitly
    let cache = Arc::new(AddressCache::new(config.cache.clone()));
    info!(
        "Address cache initialized: enabled={}, max size {}",
        config.cache.enabled, config.cache.max_size
    );

    let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
    let metrics = Arc::new(BatchMetrics::new());
    let rpc_client = Arc::new(EthRpcClient::new(&config.rpc_endpoint, config.rpc_timeout)?);
    info!("RPC client ready for endpoint {}", config.rpc_endpoint);

    let processor = Arc::new(BatchProcessor::new(
        config.clone(),
        db_pool.clone(),
        rpc_client,
        limiter,
        cache.clone(),
        metrics,
    ));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        db_pool: db_pool.clone(),
        cache,
        processor: processor.clone(),
    });

    // Main shutdown token
    let shutdown = CancellationToken::new();

    // Start the batch scheduler
    let scheduler_shutdown = shutdown.clone();
    let scheduler_handle = tokio::spawn(scheduler::run_scheduler(
        processor,
        config.schedule_interval,
        config.prefetch_enabled,
        scheduler_shutdown,
    ));
    info!("Batch scheduler started");

    // Start HTTP server
    let app = api::create_router(app_state);
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_shutdown.cancelled().await;
            })
            .await
            .expect("Server error");
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    // Initiate shutdown
    info!("Initiating graceful shutdown sequence");
    shutdown.cancel();

    // Wait for components to shut down (with timeout)
    let shutdown_timeout = tokio::time::Duration::from_secs(10);

    tokio::select! {
        _ = tokio::time::sleep(shutdown_timeout) => {
            warn!("Scheduler shutdown timed out after {:?}, forcing exit", shutdown_timeout);
        }
        _ = scheduler_handle => {
            info!("Batch scheduler shut down successfully");
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(shutdown_timeout) => {
            warn!("Server shutdown timed out, forcing exit");
        }
        _ = server_handle => {
            info!("HTTP server shut down successfully");
        }
    }

    info!("All components shut down, exiting");
    Ok(())
}
