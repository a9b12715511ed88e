//! HTTP boundary for receipt field extraction.

pub mod routes;

use anyhow::Context;
use boleta_core::ServerConfig;
use tokio::net::TcpListener;
use tracing::info;

pub use routes::{router, AppState, SharedPipeline};

/// Initialise tracing with `RUST_LOG`, falling back to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();
}

/// Bind the configured address. Host names are resolved.
pub async fn bind(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))
}

/// Bind and serve until Ctrl+C or SIGTERM.
pub async fn run_server(config: &ServerConfig, state: AppState) -> anyhow::Result<()> {
    let listener = bind(config).await?;
    let app = router(state, config.max_upload_bytes);
    info!(addr = %listener.local_addr()?, "boleta server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
