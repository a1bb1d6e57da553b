use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relister_core::{
    load_config, validate_config, BridgeClient, BulkOrchestrator, JobStore, ListingAgent,
    SqliteJobStore, TargetDriver, TargetManager,
};
use relister_server::api::create_router;
use relister_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("RELISTER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!("Configuration loaded (hash {})", &config_hash[..16]);
    info!("Database path: {:?}", config.database.path);

    // Create SQLite job store
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    // Create orchestrator if a bridge is configured
    let orchestrator = match &config.bridge {
        Some(bridge_config) => {
            info!("Connecting to browser bridge at {}", bridge_config.url);
            let bridge = Arc::new(
                BridgeClient::new(bridge_config.clone())
                    .context("Failed to create bridge client")?,
            );
            let driver: Arc<dyn TargetDriver> = bridge.clone();
            let agent: Arc<dyn ListingAgent> = bridge;
            let targets = Arc::new(TargetManager::new(driver, config.target.clone()));

            let orchestrator = BulkOrchestrator::new(
                config.orchestrator.clone(),
                Arc::clone(&store),
                targets,
                agent,
            );

            if config.orchestrator.recover_on_start {
                match orchestrator.recover().await {
                    Ok(batches) if batches.is_empty() => info!("No interrupted batches to recover"),
                    Ok(batches) => {
                        for batch in &batches {
                            info!(
                                "Recovering batch {} ({} unfinished jobs)",
                                batch.batch_id, batch.job_count
                            );
                        }
                    }
                    Err(e) => error!("Failed to recover interrupted batches: {}", e),
                }
            }
            Some(orchestrator)
        }
        None => {
            warn!("No [bridge] configured, batch endpoints are disabled");
            None
        }
    };

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        orchestrator.clone(),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Unfinished jobs keep their checkpoints and resume on next start
    if let Some(orchestrator) = orchestrator {
        if orchestrator.is_running().await {
            info!("Terminating active batch...");
            if let Err(e) = orchestrator.terminate().await {
                warn!("Failed to terminate active batch: {}", e);
            }
            orchestrator.wait_for_idle().await;
            info!("Active batch stopped");
        }
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
}
