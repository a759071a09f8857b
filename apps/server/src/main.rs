//! Toolgate server binary
//!
//! Reads configuration from the environment, hydrates the credential store,
//! builds the configured provider, and serves until interrupted.

use std::sync::Arc;

use anyhow::Result;
use toolgate_core::OAuthConfig;
use toolgate_gateway::{build_provider, AppState, GatewayConfig, GatewayServer};
use toolgate_store::CredentialStore;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let oauth = OAuthConfig::from_env()?;
    let gateway = GatewayConfig::from_env();

    if !oauth.enabled {
        warn!("[Startup] OAuth is disabled (OAUTH_ENABLED=false) - refusing to serve unprotected tools");
        return Ok(());
    }

    info!(
        "[Startup] Provider: {}, issuer: {}, storage: {:?}",
        oauth.provider.as_str(),
        oauth.issuer_url,
        oauth.storage_dir
    );

    let store = Arc::new(CredentialStore::open(&oauth.storage_dir).await?);
    let config = Arc::new(oauth);
    let provider = build_provider(config.clone(), store.clone())?;

    let state = AppState { config, store, provider };
    GatewayServer::new(gateway, state).run().await
}
