//! Google provider
//!
//! Delegates user authentication to Google OAuth 2.0 / OpenID Connect, then
//! issues this server's own tokens for tool access. Endpoints come from the
//! OIDC discovery document, fetched once and cached, with well-known URLs as
//! a fallback when discovery is unreachable.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use toolgate_core::{OAuthConfig, ProviderKind};
use toolgate_store::{
    now_ts, AccessTokenRecord, AuthCodeRecord, ClientRecord, CredentialStore, IdentityClaims,
    PendingAuthorization,
};
use tracing::{error, info, warn};

use crate::auth::{grants, tokens, TokenError, TokenGrant};

use super::idp::{IdpClient, IdpEndpoints};
use super::{
    complete_federated_consent, AuthorizeAction, AuthorizeRequest, ConsentForm, ConsentPrompt,
    FlowError, OAuthProvider, ProviderInfo,
};

const GOOGLE_DISCOVERY_URL: &str = "https://accounts.google.com/.well-known/openid-configuration";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

/// Scopes requested from Google for the identity leg.
const GOOGLE_SCOPES: &str = "openid email profile";

pub struct GoogleProvider {
    config: Arc<OAuthConfig>,
    store: Arc<CredentialStore>,
    idp: IdpClient,
    endpoints: RwLock<Option<IdpEndpoints>>,
}

impl GoogleProvider {
    pub fn new(config: Arc<OAuthConfig>, store: Arc<CredentialStore>) -> anyhow::Result<Self> {
        info!("[OAuth] Google provider initialized: {}", config.issuer_url);
        Ok(Self {
            config,
            store,
            idp: IdpClient::new()?,
            endpoints: RwLock::new(None),
        })
    }

    /// Resolve Google's endpoints: configured overrides first, then the
    /// cached discovery result, then a discovery fetch with well-known
    /// fallbacks on failure.
    async fn endpoints(&self) -> IdpEndpoints {
        let overrides = &self.config.idp_endpoints;
        if let (Some(auth), Some(token), Some(userinfo)) = (
            overrides.authorization_endpoint.as_ref(),
            overrides.token_endpoint.as_ref(),
            overrides.userinfo_endpoint.as_ref(),
        ) {
            return IdpEndpoints {
                authorization_endpoint: auth.clone(),
                token_endpoint: token.clone(),
                userinfo_endpoint: userinfo.clone(),
            };
        }

        if let Some(cached) = self.endpoints.read().await.as_ref() {
            return cached.clone();
        }

        let resolved = match self.idp.discover(GOOGLE_DISCOVERY_URL).await {
            Ok(doc) => {
                info!("[OAuth] Fetched Google OIDC discovery document");
                IdpEndpoints {
                    authorization_endpoint: doc.authorization_endpoint,
                    token_endpoint: doc.token_endpoint,
                    userinfo_endpoint: doc
                        .userinfo_endpoint
                        .unwrap_or_else(|| GOOGLE_USERINFO_URL.to_string()),
                }
            }
            Err(err) => {
                warn!("[OAuth] Google discovery failed ({err:#}) - using well-known endpoints");
                IdpEndpoints {
                    authorization_endpoint: GOOGLE_AUTH_URL.to_string(),
                    token_endpoint: GOOGLE_TOKEN_URL.to_string(),
                    userinfo_endpoint: GOOGLE_USERINFO_URL.to_string(),
                }
            }
        };

        *self.endpoints.write().await = Some(resolved.clone());
        resolved
    }

    fn claims_from_profile(profile: &serde_json::Value) -> Option<IdentityClaims> {
        let subject = profile.get("sub")?.as_str()?.to_string();
        Some(IdentityClaims {
            subject,
            email: profile.get("email").and_then(|v| v.as_str()).map(String::from),
            name: profile.get("name").and_then(|v| v.as_str()).map(String::from),
        })
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            kind: ProviderKind::Google,
            display_name: ProviderKind::Google.display_name(),
            external: true,
        }
    }

    async fn start_authorization(
        &self,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeAction, FlowError> {
        let endpoints = self.endpoints().await;
        let client_id = self.config.client_id.as_deref().ok_or_else(|| {
            FlowError::page("server_error", "Identity provider credentials are not configured")
        })?;

        // Correlate the IdP round trip back to this request via our own state
        let correlation = tokens::generate_token();
        self.store
            .put_pending(
                &correlation,
                PendingAuthorization {
                    client_id: request.client_id.clone(),
                    client_name: request.client_name.clone(),
                    redirect_uri: request.redirect_uri.clone(),
                    scopes: request.scopes.clone(),
                    code_challenge: request.code_challenge.clone(),
                    code_challenge_method: request.code_challenge_method.clone(),
                    state: Some(request.state.clone()),
                    expires_at: now_ts() + self.config.ttls.pending_auth,
                },
            )
            .await;

        let mut url = url::Url::parse(&endpoints.authorization_endpoint)
            .map_err(|_| FlowError::page("server_error", "Invalid IdP authorization endpoint"))?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", &self.config.callback_url())
            .append_pair("response_type", "code")
            .append_pair("scope", GOOGLE_SCOPES)
            .append_pair("state", &correlation)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        info!(
            "[OAuth] Redirecting client {} to Google for authentication",
            request.client_id
        );
        Ok(AuthorizeAction::Redirect(url.to_string()))
    }

    async fn handle_idp_callback(&self, code: &str, state: &str)
        -> Result<ConsentPrompt, FlowError> {
        let pending = self.store.take_pending(state).await.map_err(|_| {
            warn!("[OAuth] Google callback with unknown or expired state");
            FlowError::page("invalid_request", "Unknown or expired authorization state")
        })?;

        let endpoints = self.endpoints().await;
        let callback_url = self.config.callback_url();
        let client_id = self.config.client_id.as_deref().unwrap_or_default();
        let client_secret = self.config.client_secret.as_deref().unwrap_or_default();

        let upstream = self
            .idp
            .exchange_code(
                &endpoints.token_endpoint,
                &[
                    ("code", code),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                    ("redirect_uri", callback_url.as_str()),
                    ("grant_type", "authorization_code"),
                ],
            )
            .await
            .map_err(|err| {
                error!("[OAuth] Google token exchange failed: {err:#}");
                FlowError::Redirect {
                    redirect_uri: pending.redirect_uri.clone(),
                    error: "access_denied",
                    description: "Identity provider token exchange failed".to_string(),
                    state: pending.state.clone(),
                }
            })?;

        let profile = self
            .idp
            .userinfo(&endpoints.userinfo_endpoint, &upstream.access_token)
            .await
            .map_err(|err| {
                error!("[OAuth] Google userinfo fetch failed: {err:#}");
                FlowError::Redirect {
                    redirect_uri: pending.redirect_uri.clone(),
                    error: "access_denied",
                    description: "Identity provider profile fetch failed".to_string(),
                    state: pending.state.clone(),
                }
            })?;

        let claims = Self::claims_from_profile(&profile);
        info!(
            "[OAuth] Google authentication successful for {}",
            claims
                .as_ref()
                .and_then(|c| c.email.as_deref())
                .unwrap_or("unknown user")
        );

        let mcp_code = tokens::unique_token(&self.store).await;
        self.store
            .add_code(AuthCodeRecord {
                code: mcp_code.clone(),
                client_id: pending.client_id.clone(),
                redirect_uri: pending.redirect_uri.clone(),
                scopes: pending.scopes.clone(),
                code_challenge: pending.code_challenge.clone(),
                code_challenge_method: pending.code_challenge_method.clone(),
                expires_at: now_ts() + self.config.ttls.auth_code,
                original_state: pending.state.clone(),
                claims: claims.clone(),
            })
            .await;

        Ok(ConsentPrompt {
            client_name: pending
                .client_name
                .unwrap_or_else(|| "Unknown Application".to_string()),
            scopes: pending.scopes,
            request: None,
            code: Some(mcp_code),
            user: claims,
        })
    }

    async fn complete_authorization(&self, form: ConsentForm) -> Result<String, FlowError> {
        complete_federated_consent(&self.store, form).await
    }

    async fn exchange_code(
        &self,
        client: &ClientRecord,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, TokenError> {
        grants::exchange_code(&self.store, &self.config, client, code, code_verifier, redirect_uri)
            .await
    }

    async fn refresh(
        &self,
        client: &ClientRecord,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenGrant, TokenError> {
        grants::refresh(&self.store, &self.config, client, refresh_token, scope).await
    }

    async fn introspect(&self, token: &str) -> Option<AccessTokenRecord> {
        grants::introspect(&self.store, token).await
    }

    async fn revoke(&self, client: Option<&ClientRecord>, token: &str) {
        grants::revoke(&self.store, client, token).await;
    }
}
