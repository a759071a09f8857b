//! Custom (non-federated) provider
//!
//! No external IdP: `/authorize` renders the local consent page directly and
//! approval mints the authorization code on the spot. The consent form
//! round-trips the validated request through hidden fields, so no pending
//! record is needed for this variant.

use std::sync::Arc;

use async_trait::async_trait;
use toolgate_core::{OAuthConfig, ProviderKind};
use toolgate_store::{now_ts, AccessTokenRecord, AuthCodeRecord, ClientRecord, CredentialStore};
use tracing::info;

use crate::auth::{grants, tokens, TokenError, TokenGrant};

use super::{
    code_redirect, error_redirect, AuthorizeAction, AuthorizeRequest, ConsentForm, ConsentPrompt,
    FlowError, OAuthProvider, ProviderInfo,
};

pub struct CustomProvider {
    config: Arc<OAuthConfig>,
    store: Arc<CredentialStore>,
}

impl CustomProvider {
    pub fn new(config: Arc<OAuthConfig>, store: Arc<CredentialStore>) -> Self {
        info!("[OAuth] Custom provider initialized: {}", config.issuer_url);
        Self { config, store }
    }
}

#[async_trait]
impl OAuthProvider for CustomProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            kind: ProviderKind::Custom,
            display_name: ProviderKind::Custom.display_name(),
            external: false,
        }
    }

    async fn start_authorization(
        &self,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeAction, FlowError> {
        info!("[OAuth] Authorization request initiated for client {}", request.client_id);
        Ok(AuthorizeAction::Consent(ConsentPrompt {
            client_name: request
                .client_name
                .clone()
                .unwrap_or_else(|| "Unknown Application".to_string()),
            scopes: request.scopes.clone(),
            request: Some(request),
            code: None,
            user: None,
        }))
    }

    async fn handle_idp_callback(&self, _code: &str, _state: &str)
        -> Result<ConsentPrompt, FlowError> {
        Err(FlowError::page(
            "invalid_request",
            "No identity provider is configured",
        ))
    }

    async fn complete_authorization(&self, form: ConsentForm) -> Result<String, FlowError> {
        let (approved, request) = match form {
            ConsentForm::Local { approved, request } => (approved, request),
            ConsentForm::Federated { .. } => {
                return Err(FlowError::page("invalid_request", "Unexpected consent form"));
            }
        };

        // The form fields came back from the user agent; re-validate against
        // the registration before acting on them.
        let client = self
            .store
            .get_client(&request.client_id)
            .await
            .ok_or_else(|| FlowError::page("invalid_request", "Unknown client"))?;
        if !client.has_redirect_uri(&request.redirect_uri) {
            return Err(FlowError::page(
                "invalid_request",
                "Redirect URI is not registered for this client",
            ));
        }

        if !approved {
            info!("[OAuth] Authorization denied for client {}", client.client_id);
            return Ok(error_redirect(
                &request.redirect_uri,
                "access_denied",
                "User denied authorization",
                Some(&request.state),
            ));
        }

        let code = tokens::unique_token(&self.store).await;
        self.store
            .add_code(AuthCodeRecord {
                code: code.clone(),
                client_id: client.client_id.clone(),
                redirect_uri: request.redirect_uri.clone(),
                scopes: request.scopes.clone(),
                code_challenge: request.code_challenge.clone(),
                code_challenge_method: request.code_challenge_method.clone(),
                expires_at: now_ts() + self.config.ttls.auth_code,
                original_state: Some(request.state.clone()),
                claims: None,
            })
            .await;

        info!("[OAuth] Authorization approved for client {}", client.client_id);
        Ok(code_redirect(&request.redirect_uri, &code, Some(&request.state)))
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
