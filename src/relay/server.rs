use crate::{
    config::{RelayConfig, UpstreamConfig},
    error::{RelayError, Result, SnapcoachError},
    upstream::CompletionProvider,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use super::handlers::{analyze_handler, health_handler};
use super::stats::RelayStats;

/// Shared state for the Axum server
#[derive(Clone)]
pub struct RelayState {
    pub(crate) provider: Arc<dyn CompletionProvider>,
    pub(crate) upstream: Arc<UpstreamConfig>,
    pub(crate) stats: Arc<RelayStats>,
}

impl RelayState {
    pub fn new(provider: Arc<dyn CompletionProvider>, upstream: UpstreamConfig) -> Self {
        Self {
            provider,
            upstream: Arc::new(upstream),
            stats: Arc::new(RelayStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }
}

/// Build the relay's routes around the given state
pub fn build_router(state: RelayState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Relay that streams upstream analyses back to HTTP clients
pub struct RelayServer {
    pub(crate) config: RelayConfig,
    pub(crate) state: RelayState,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(
        config: RelayConfig,
        upstream: UpstreamConfig,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            config,
            state: RelayState::new(provider, upstream),
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), self.config.max_body_bytes)
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.state.stats()
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.config.ip, self.config.port);

        info!("Starting analysis relay on {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        info!(
            "Relay listening on {} (provider: {}, configured: {})",
            local,
            self.state.provider.name(),
            self.state.provider.is_configured()
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| RelayError::StartupFailed {
                details: format!("Server error: {}", e),
            })?;

        info!("Relay stopped");
        Ok(())
    }
}

/// Relay server builder for configuration
pub struct RelayServerBuilder {
    config: Option<RelayConfig>,
    upstream: Option<UpstreamConfig>,
    provider: Option<Arc<dyn CompletionProvider>>,
}

impl RelayServerBuilder {
    /// Create a new relay server builder
    pub fn new() -> Self {
        Self {
            config: None,
            upstream: None,
            provider: None,
        }
    }

    /// Set the listener configuration
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the upstream request settings (prompt, token ceiling, detail)
    pub fn upstream(mut self, upstream: UpstreamConfig) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Set the completion provider
    pub fn provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Build the relay server
    pub fn build(self) -> Result<RelayServer> {
        let config = self.config.ok_or_else(|| {
            SnapcoachError::Relay(RelayError::StartupFailed {
                details: "Relay configuration is required".to_string(),
            })
        })?;

        let upstream = self.upstream.ok_or_else(|| {
            SnapcoachError::Relay(RelayError::StartupFailed {
                details: "Upstream configuration is required".to_string(),
            })
        })?;

        let provider = self.provider.ok_or_else(|| {
            SnapcoachError::Relay(RelayError::StartupFailed {
                details: "Completion provider is required".to_string(),
            })
        })?;

        Ok(RelayServer::new(config, upstream, provider))
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
