//! Gateway server
//!
//! Mounts the OAuth endpoints, the IdP callbacks, and the bearer-protected
//! tool routes, then serves until shutdown. The credential store is flushed
//! and the sweeper stopped before exit.

mod consent;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use toolgate_core::OAuthConfig;
use toolgate_store::CredentialStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::bearer::bearer_auth;
use crate::providers::OAuthProvider;

/// Listener configuration, separate from the OAuth config.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            enable_cors: true,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("TOOLGATE_HOST").unwrap_or(defaults.host),
            port: std::env::var("TOOLGATE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            enable_cors: defaults.enable_cors,
        }
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {e}"))
    }
}

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OAuthConfig>,
    pub store: Arc<CredentialStore>,
    pub provider: Arc<dyn OAuthProvider>,
}

/// Build the full router: OAuth surface plus bearer-protected tool routes.
pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let tool_routes: Router<AppState> = Router::new()
        .route("/tools/whoami", get(handlers::whoami))
        .layer(middleware::from_fn_with_state(state.clone(), bearer_auth));

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/.well-known/oauth-authorization-server",
            get(handlers::oauth_metadata),
        )
        .route("/register", post(handlers::register))
        .route(
            "/authorize",
            get(handlers::authorize_get).post(handlers::authorize_post),
        )
        .route("/oauth/authorize/approve", post(handlers::approve_local))
        .route("/oauth/google/callback", get(handlers::google_callback))
        .route("/oauth/azure/callback", get(handlers::azure_callback))
        .route("/oauth/consent/approve", post(handlers::approve_federated))
        .route("/token", post(handlers::token))
        .route("/revoke", post(handlers::revoke))
        .merge(tool_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router
}

/// The runnable server: router, sweeper, graceful shutdown, final flush.
pub struct GatewayServer {
    config: GatewayConfig,
    state: AppState,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.addr()?;
        let shutdown = CancellationToken::new();

        let sweeper = Arc::clone(&self.state.store).spawn_sweeper(shutdown.clone());

        let router = build_router(self.state.clone(), self.config.enable_cors);
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(
            "[Gateway] Listening on {} (issuer: {}, provider: {})",
            addr,
            self.state.config.issuer_url,
            self.state.provider.info().display_name
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("[Gateway] Shutdown signal received");
            })
            .await?;

        // Stop accepting work, then persist what must survive the restart
        shutdown.cancel();
        let _ = sweeper.await;
        self.state.store.flush().await?;
        info!("[Gateway] Store flushed, exiting");
        Ok(())
    }
}
