use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use lanfinderd::api;
use lanfinderd::config::Config;
use lanfinderd::scheduler::{self, Discovery};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lanfinderd=info"))
        )
        .init();

    tracing::info!("Starting lanfinderd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/lanfinder/lanfinderd.toml".to_string());

    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!(
        "Probing on {} (SSDP {:?}, mDNS {:?})",
        config.discovery.interface,
        config.discovery.ssdp_timeout(),
        config.discovery.mdns_timeout()
    );

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let discovery = Discovery::from_config(&config, cancel.clone());

    // Spawn the round scheduler
    let scheduler_handle = tokio::spawn(scheduler::run(
        discovery.clone(),
        config.schedule.mode,
        config.schedule.interval(),
    ));

    // Build API router
    let app = api::routes::router(api::routes::AppState { discovery });

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Cancels any in-flight round and stops the server
    cancel.cancel();

    let _ = tokio::join!(scheduler_handle, server_handle);

    tracing::info!("Shutdown complete");
    Ok(())
}
