//! HTTP server components for movies-api
//!
//! This module provides the HTTP server infrastructure including:
//! - Router configuration and route handlers
//! - Rate limiting, authentication, error and logging middleware
//! - Server lifecycle management

pub mod middleware;
pub mod movies;
pub mod router;
pub mod users;

pub use middleware::{ActivatedUser, CurrentIdentity, JsonBody};
pub use router::{build_router, AppState, HealthResponse};

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::config::ServerConfig;
use crate::database::Database;

/// HTTP Server for movies-api
///
/// Manages the axum server lifecycle, including:
/// - Binding to configured address
/// - Graceful shutdown bounded by the configured grace period
pub struct Server<D: Database + 'static> {
    config: ServerConfig,
    state: AppState<D>,
}

impl<D: Database + 'static> Server<D> {
    /// Create a new server instance
    pub fn new(config: ServerConfig, state: AppState<D>) -> Self {
        Self { config, state }
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> Result<SocketAddr, ServerError> {
        let ip = self
            .config
            .host
            .parse()
            .map_err(|_| ServerError::Config(format!("invalid host: {}", self.config.host)))?;
        Ok(SocketAddr::new(ip, self.config.port))
    }

    /// Run the server until shutdown signal is received
    ///
    /// # Arguments
    ///
    /// * `shutdown` - Future that resolves when the server should shut down
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.bind_addr()?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener
    ///
    /// After `shutdown` resolves no new connections are accepted. In-flight
    /// requests get `shutdown_grace_secs` to finish before they are dropped.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        let grace = self.config.shutdown_grace();
        let app = build_router(self.state);

        let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
        let shutdown = async move {
            shutdown.await;
            tracing::info!("Shutting down HTTP server");
            let _ = signalled_tx.send(());
        };

        tracing::info!("Server listening on {}", addr);

        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .into_future();

        tokio::select! {
            result = serve => {
                result.map_err(|e| ServerError::Serve(e.to_string()))?;
            }
            _ = grace_deadline(signalled_rx, grace) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "Grace period elapsed, dropping in-flight requests"
                );
            }
        }

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Resolves `grace` after the shutdown signal; never resolves without one
async fn grace_deadline(signalled: oneshot::Receiver<()>, grace: Duration) {
    if signalled.await.is_ok() {
        tokio::time::sleep(grace).await;
    } else {
        std::future::pending::<()>().await;
    }
}

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    /// Failed to serve requests
    #[error("Server error: {0}")]
    Serve(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
