//! Azure Entra ID provider
//!
//! Delegates user authentication to the Microsoft identity platform. The
//! tenant segment of the authority is configurable: "common",
//! "organizations", "consumers", or a specific tenant id. The user profile
//! comes from Microsoft Graph `/me`.

use std::sync::Arc;

use async_trait::async_trait;
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

const GRAPH_ME_URL: &str = "https://graph.microsoft.com/v1.0/me";

/// Scopes requested from Microsoft for the identity leg. `User.Read` is the
/// Graph permission backing the profile fetch.
const AZURE_SCOPES: &str = "openid profile email offline_access User.Read";

pub struct AzureProvider {
    config: Arc<OAuthConfig>,
    store: Arc<CredentialStore>,
    idp: IdpClient,
    endpoints: IdpEndpoints,
}

impl AzureProvider {
    pub fn new(config: Arc<OAuthConfig>, store: Arc<CredentialStore>) -> anyhow::Result<Self> {
        let tenant = config.tenant_id.clone().unwrap_or_else(|| "common".to_string());
        let authority = format!("https://login.microsoftonline.com/{tenant}");

        let overrides = &config.idp_endpoints;
        let endpoints = IdpEndpoints {
            authorization_endpoint: overrides
                .authorization_endpoint
                .clone()
                .unwrap_or_else(|| format!("{authority}/oauth2/v2.0/authorize")),
            token_endpoint: overrides
                .token_endpoint
                .clone()
                .unwrap_or_else(|| format!("{authority}/oauth2/v2.0/token")),
            userinfo_endpoint: overrides
                .userinfo_endpoint
                .clone()
                .unwrap_or_else(|| GRAPH_ME_URL.to_string()),
        };

        info!("[OAuth] Azure provider initialized (authority: {})", authority);
        Ok(Self {
            config,
            store,
            idp: IdpClient::new()?,
            endpoints,
        })
    }

    fn claims_from_profile(profile: &serde_json::Value) -> Option<IdentityClaims> {
        let subject = profile.get("id")?.as_str()?.to_string();
        let email = profile
            .get("mail")
            .and_then(|v| v.as_str())
            .or_else(|| profile.get("userPrincipalName").and_then(|v| v.as_str()))
            .map(String::from);
        Some(IdentityClaims {
            subject,
            email,
            name: profile.get("displayName").and_then(|v| v.as_str()).map(String::from),
        })
    }
}

#[async_trait]
impl OAuthProvider for AzureProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            kind: ProviderKind::Azure,
            display_name: ProviderKind::Azure.display_name(),
            external: true,
        }
    }

    async fn start_authorization(
        &self,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeAction, FlowError> {
        let client_id = self.config.client_id.as_deref().ok_or_else(|| {
            FlowError::page("server_error", "Identity provider credentials are not configured")
        })?;

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

        let mut url = url::Url::parse(&self.endpoints.authorization_endpoint)
            .map_err(|_| FlowError::page("server_error", "Invalid IdP authorization endpoint"))?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", &self.config.callback_url())
            .append_pair("response_type", "code")
            .append_pair("scope", AZURE_SCOPES)
            .append_pair("state", &correlation)
            .append_pair("response_mode", "query")
            .append_pair("prompt", "consent");

        info!(
            "[OAuth] Redirecting client {} to Azure for authentication",
            request.client_id
        );
        Ok(AuthorizeAction::Redirect(url.to_string()))
    }

    async fn handle_idp_callback(&self, code: &str, state: &str)
        -> Result<ConsentPrompt, FlowError> {
        let pending = self.store.take_pending(state).await.map_err(|_| {
            warn!("[OAuth] Azure callback with unknown or expired state");
            FlowError::page("invalid_request", "Unknown or expired authorization state")
        })?;

        let callback_url = self.config.callback_url();
        let client_id = self.config.client_id.as_deref().unwrap_or_default();
        let client_secret = self.config.client_secret.as_deref().unwrap_or_default();

        let upstream = self
            .idp
            .exchange_code(
                &self.endpoints.token_endpoint,
                &[
                    ("code", code),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                    ("redirect_uri", callback_url.as_str()),
                    ("grant_type", "authorization_code"),
                    ("scope", "User.Read"),
                ],
            )
            .await
            .map_err(|err| {
                error!("[OAuth] Azure token exchange failed: {err:#}");
                FlowError::Redirect {
                    redirect_uri: pending.redirect_uri.clone(),
                    error: "access_denied",
                    description: "Identity provider token exchange failed".to_string(),
                    state: pending.state.clone(),
                }
            })?;

        let profile = self
            .idp
            .userinfo(&self.endpoints.userinfo_endpoint, &upstream.access_token)
            .await
            .map_err(|err| {
                error!("[OAuth] Microsoft Graph profile fetch failed: {err:#}");
                FlowError::Redirect {
                    redirect_uri: pending.redirect_uri.clone(),
                    error: "access_denied",
                    description: "Identity provider profile fetch failed".to_string(),
                    state: pending.state.clone(),
                }
            })?;

        let claims = Self::claims_from_profile(&profile);
        info!(
            "[OAuth] Azure authentication successful for {}",
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
