//! Credential record types
//!
//! Value types handed out by the store. Callers always receive copies; the
//! store keeps the only live instances. Expiry timestamps are epoch seconds
//! UTC throughout.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current time as epoch seconds UTC.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// A registered OAuth client (RFC 7591 dynamic registration).
///
/// Persisted in `clients.json`. Never mutated after creation.
/// `client_secret_hash` must be omitted from JSON when absent - serializing
/// an explicit null breaks downstream validators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_hash: Option<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default = "default_auth_method")]
    pub token_endpoint_auth_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub issued_at: i64,
}

fn default_grant_types() -> Vec<String> {
    vec!["authorization_code".to_string(), "refresh_token".to_string()]
}

fn default_response_types() -> Vec<String> {
    vec!["code".to_string()]
}

fn default_auth_method() -> String {
    "none".to_string()
}

impl ClientRecord {
    /// Public clients were never issued a secret and authenticate by PKCE only.
    pub fn is_public(&self) -> bool {
        self.client_secret_hash.is_none()
    }

    pub fn display_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or("Unknown Application")
    }

    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }
}

/// End-user identity captured from an external IdP.
///
/// Attached to authorization codes and access tokens for observability;
/// never serialized to tool clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityClaims {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One-time authorization code. In-memory only.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthCodeRecord {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub expires_at: i64,
    /// The `state` the MCP client sent, returned verbatim on redirect.
    pub original_state: Option<String>,
    pub claims: Option<IdentityClaims>,
}

impl AuthCodeRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

/// Bearer access token. In-memory only; a restart invalidates all of them.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessTokenRecord {
    pub token: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: i64,
    pub claims: Option<IdentityClaims>,
}

impl AccessTokenRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

/// Rotating refresh token. Persisted in `refresh_tokens.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: i64,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

/// An authorization request parked while the user completes the external IdP
/// round trip. Keyed by the correlation token we passed as the IdP `state`.
/// In-memory only.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAuthorization {
    pub client_id: String,
    pub client_name: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
    /// The MCP client's own `state`, not the correlation token.
    pub state: Option<String>,
    pub expires_at: i64,
}

impl PendingAuthorization {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}
