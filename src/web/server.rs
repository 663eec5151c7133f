//! Web server implementation using axum

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;

use tokentrack_core::tracker::SharedRegistry;

use super::api::{self, ApiState};

/// HTTP server answering token queries
pub struct WebServer {
    port: u16,
    registry: SharedRegistry,
}

impl WebServer {
    /// Create a new web server
    pub fn new(port: u16, registry: SharedRegistry) -> Self {
        Self { port, registry }
    }

    /// Run the web server until it fails
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let app = routes(Arc::new(ApiState {
            registry: self.registry,
        }));

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        tracing::info!("Token tracker listening on http://{}", addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// All API routes
pub(crate) fn routes(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/tokens", get(api::get_tokens))
        .route("/status", get(api::get_status))
        .route("/metrics", get(api::get_metrics))
        .route("/shutdown", get(api::shutdown).post(api::shutdown))
        .with_state(state)
}
