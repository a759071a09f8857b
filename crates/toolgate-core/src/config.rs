//! OAuth server configuration
//!
//! All settings come from `OAUTH_*` environment variables. Validation happens
//! once at startup; the resulting config is immutable for the process
//! lifetime and shared behind an `Arc`.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::scopes::ScopePolicy;

/// Default directory for the durable credential files.
const DEFAULT_STORAGE_DIR: &str = ".oauth_data";

/// Which provider variant the factory instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Custom,
    Google,
    Azure,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "custom" => Some(Self::Custom),
            "google" => Some(Self::Google),
            "azure" => Some(Self::Azure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Google => "google",
            Self::Azure => "azure",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Custom => "Custom OAuth",
            Self::Google => "Google OAuth",
            Self::Azure => "Azure Entra ID",
        }
    }

    /// Whether this variant interposes an external identity provider.
    pub fn is_external(&self) -> bool {
        !matches!(self, Self::Custom)
    }
}

/// Credential lifetimes, in seconds.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TokenTtls {
    pub access_token: i64,
    pub refresh_token: i64,
    pub auth_code: i64,
    /// How long a federated round trip may take before the pending
    /// authorization is dropped.
    pub pending_auth: i64,
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            access_token: 3600,
            refresh_token: 86_400,
            auth_code: 600,
            pending_auth: 600,
        }
    }
}

/// Overrides for the upstream IdP endpoints.
///
/// Normally empty: Google endpoints come from OIDC discovery and Azure
/// endpoints are derived from the tenant. Tests point these at a mock server.
#[derive(Debug, Clone, Default)]
pub struct IdpEndpointOverrides {
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
}

/// Validated OAuth server configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub enabled: bool,
    pub provider: ProviderKind,
    /// Absolute base URL, no trailing slash. Used as the `issuer` and to
    /// derive every endpoint URL in the metadata document.
    pub issuer_url: String,
    pub scopes: ScopePolicy,
    pub ttls: TokenTtls,
    /// Credentials at the external IdP (federated variants only).
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Azure tenant: "common", "organizations", "consumers", or a tenant id.
    pub tenant_id: Option<String>,
    pub storage_dir: PathBuf,
    pub idp_endpoints: IdpEndpointOverrides,
}

impl OAuthConfig {
    /// Read configuration from `OAUTH_*` environment variables and validate.
    pub fn from_env() -> Result<Self> {
        let enabled = env_flag("OAUTH_ENABLED", true);

        let provider = match env::var("OAUTH_PROVIDER") {
            Ok(value) => ProviderKind::parse(&value)
                .with_context(|| format!("Unknown OAUTH_PROVIDER: {value} (expected custom, google, or azure)"))?,
            Err(_) => ProviderKind::Custom,
        };

        let issuer_url = env::var("OAUTH_ISSUER_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();

        let valid = env::var("OAUTH_VALID_SCOPES")
            .map(|v| ScopePolicy::parse_list(&v))
            .unwrap_or_else(|_| ScopePolicy::default_valid());
        let default = env::var("OAUTH_DEFAULT_SCOPES")
            .map(|v| ScopePolicy::parse_list(&v))
            .unwrap_or_else(|_| ScopePolicy::default_granted());

        let ttls = TokenTtls {
            access_token: env_seconds("OAUTH_ACCESS_TOKEN_TTL", 3600)?,
            refresh_token: env_seconds("OAUTH_REFRESH_TOKEN_TTL", 86_400)?,
            auth_code: env_seconds("OAUTH_AUTH_CODE_TTL", 600)?,
            pending_auth: 600,
        };

        let config = Self {
            enabled,
            provider,
            issuer_url,
            scopes: ScopePolicy::new(valid, default),
            ttls,
            client_id: env::var("OAUTH_CLIENT_ID").ok().filter(|v| !v.is_empty()),
            client_secret: env::var("OAUTH_CLIENT_SECRET").ok().filter(|v| !v.is_empty()),
            tenant_id: env::var("OAUTH_TENANT_ID").ok().filter(|v| !v.is_empty()),
            storage_dir: env::var("OAUTH_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_DIR)),
            idp_endpoints: IdpEndpointOverrides::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. Violations here are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let issuer = url::Url::parse(&self.issuer_url)
            .with_context(|| format!("OAUTH_ISSUER_URL is not a valid URL: {}", self.issuer_url))?;

        let loopback = matches!(issuer.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"));
        if issuer.scheme() != "https" && !loopback {
            bail!(
                "OAUTH_ISSUER_URL must use https for non-loopback hosts, got: {}",
                self.issuer_url
            );
        }
        if issuer.scheme() != "https" {
            warn!("[Config] Issuer {} is not https - acceptable for local development only", self.issuer_url);
        }

        for scope in &self.scopes.default {
            if !self.scopes.valid.contains(scope) {
                bail!("OAUTH_DEFAULT_SCOPES contains {scope:?} which is not in OAUTH_VALID_SCOPES");
            }
        }

        if self.ttls.access_token <= 0 || self.ttls.refresh_token <= 0 || self.ttls.auth_code <= 0 {
            bail!("Token TTLs must be positive");
        }

        if self.enabled && self.provider.is_external() {
            if self.client_id.is_none() {
                bail!("{} provider requires OAUTH_CLIENT_ID", self.provider.as_str());
            }
            if self.client_secret.is_none() {
                bail!("{} provider requires OAUTH_CLIENT_SECRET", self.provider.as_str());
            }
        }

        Ok(())
    }

    /// Callback URL registered at the external IdP for this variant.
    pub fn callback_url(&self) -> String {
        format!("{}/oauth/{}/callback", self.issuer_url, self.provider.as_str())
    }

    /// A minimal config for local development and tests: custom provider,
    /// default scopes and TTLs, storage under `dir`.
    pub fn for_issuer(issuer_url: impl Into<String>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            provider: ProviderKind::Custom,
            issuer_url: issuer_url.into().trim_end_matches('/').to_string(),
            scopes: ScopePolicy::new(ScopePolicy::default_valid(), ScopePolicy::default_granted()),
            ttls: TokenTtls::default(),
            client_id: None,
            client_secret: None,
            tenant_id: None,
            storage_dir: storage_dir.into(),
            idp_endpoints: IdpEndpointOverrides::default(),
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_seconds(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<i64>()
            .with_context(|| format!("{key} must be an integer number of seconds, got {value:?}")),
        Err(_) => Ok(default),
    }
}
