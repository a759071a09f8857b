//! Outbound identity-provider client
//!
//! The one place that talks HTTP to an external IdP: OIDC discovery, the
//! authorization-code exchange, and the userinfo fetch. Calls carry a 10 s
//! deadline so a slow IdP cannot pin a request handler.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Deadline for every outbound IdP request.
const IDP_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolved IdP endpoints used by a federated provider.
#[derive(Debug, Clone)]
pub struct IdpEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
}

/// The subset of an OIDC discovery document we consume.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Token response from the IdP token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct IdpTokens {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Shared, connection-pooled HTTP client for IdP traffic.
#[derive(Debug, Clone)]
pub struct IdpClient {
    http: reqwest::Client,
}

impl IdpClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(IDP_TIMEOUT)
            .build()
            .context("Failed to build IdP HTTP client")?;
        Ok(Self { http })
    }

    /// Fetch an OIDC discovery document.
    pub async fn discover(&self, url: &str) -> Result<DiscoveryDocument> {
        debug!("[IdP] Fetching discovery document: {}", url);
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Discovery request failed")?;

        if !response.status().is_success() {
            bail!("Discovery request failed: HTTP {}", response.status());
        }

        response.json().await.context("Malformed discovery document")
    }

    /// Exchange an authorization code at the IdP token endpoint.
    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<IdpTokens> {
        debug!("[IdP] Exchanging authorization code at {}", token_endpoint);
        let response = self
            .http
            .post(token_endpoint)
            .form(params)
            .send()
            .await
            .context("IdP token request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("IdP token exchange failed: HTTP {status} - {body}");
        }

        response.json().await.context("Malformed IdP token response")
    }

    /// Fetch the user profile with the IdP access token.
    pub async fn userinfo(&self, endpoint: &str, access_token: &str) -> Result<serde_json::Value> {
        debug!("[IdP] Fetching userinfo from {}", endpoint);
        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .context("Userinfo request failed")?;

        if !response.status().is_success() {
            bail!("Userinfo request failed: HTTP {}", response.status());
        }

        response.json().await.context("Malformed userinfo response")
    }
}
