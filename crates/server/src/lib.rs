//! HTTP server composition: routing, client authentication, health,
//! graceful shutdown.
//!
//! Reusable from both the binary and the integration tests.

mod auth;
mod health;
pub mod logger;

use std::{net::SocketAddr, sync::Arc};

use axum::{Router, routing::get};
use config::Config;
use credentials::{CredentialPool, TokenRefresher};
use gateway::{Orchestrator, Settings};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// Everything `serve` needs to run the gateway.
pub struct ServeConfig {
    /// The socket address the server binds to.
    pub listen_address: SocketAddr,
    /// Parsed environment configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// The version string logged at startup.
    pub version: String,
    /// Reports the bound address back (useful with port 0).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Start the server and run until the shutdown signal fires.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    log::info!("kirogate {version}");

    let pool = Arc::new(CredentialPool::new(
        config.credentials.clone(),
        config.gateway.strategy,
        TokenRefresher::new(gateway::http_client()),
    ));

    log::info!("credential pool initialized with {} entries", pool.len());

    if let Some(write_timeout) = config.server.write_timeout {
        log::warn!(
            "SERVER_WRITE_TIMEOUT_MINUTES ({write_timeout:?}) is recognized but not enforced per-socket; \
             the request deadline covers runaway writes"
        );
    }

    let orchestrator = Arc::new(Orchestrator::new(
        pool,
        gateway::http_client(),
        Settings::from_config(&config.gateway),
    ));

    let app = Router::new()
        .merge(gateway::router(orchestrator).layer(auth::ClientAuthLayer::new(config.server.auth_token.clone())))
        .route("/health", get(health::health))
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(listen_address).await?;
    let bound_addr = listener.local_addr()?;
    log::info!("listening on {bound_addr}");

    if let Some(sender) = bound_addr_sender {
        let _ = sender.send(bound_addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
        .await?;

    log::info!("server stopped");
    Ok(())
}
