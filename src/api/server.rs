//! API HTTP Server
//!
//! Axum-based server with CORS, request tracing, and graceful shutdown.
//! On ctrl-c or SIGTERM the pool is drained before the process exits.

use axum::http::{header, Method};
use axum::Router;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{api_router, ApiState};

/// Operator API server.
pub struct ApiServer {
    addr: std::net::SocketAddr,
    state: ApiState,
}

impl ApiServer {
    pub fn new(addr: std::net::SocketAddr, state: ApiState) -> Self {
        Self { addr, state }
    }

    /// Build the router with all routes and middleware.
    fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);

        api_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Start the server and run until a shutdown signal, then drain the
    /// pool before returning.
    pub async fn run(self) -> anyhow::Result<()> {
        let router = self.build_router();

        info!("operator API listening on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        // /shutdown may already have stopped the pool; stop() is a no-op then.
        if self.state.pool.is_running() {
            self.state.pool.stop(self.state.default_drain).await;
        }

        info!("operator API shut down gracefully");
        Ok(())
    }
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
