//! Provider abstraction
//!
//! One contract, three variants. `custom` approves locally; `google` and
//! `azure` interpose an external IdP for user authentication before this
//! server issues its own credentials. The factory instantiates exactly one
//! variant from configuration at startup.

mod azure;
mod custom;
mod google;
pub mod idp;

pub use azure::AzureProvider;
pub use custom::CustomProvider;
pub use google::GoogleProvider;

use std::sync::Arc;

use async_trait::async_trait;
use toolgate_core::{OAuthConfig, ProviderKind};
use toolgate_store::{AccessTokenRecord, ClientRecord, CredentialStore, IdentityClaims};
use tracing::info;

use crate::auth::{TokenError, TokenGrant};

/// Provider identity for metadata and logs.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub kind: ProviderKind,
    pub display_name: &'static str,
    /// Whether an external IdP is interposed before local consent.
    pub external: bool,
}

/// A validated authorization request, as accepted by `/authorize`.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub client_name: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// What `/authorize` should do next.
pub enum AuthorizeAction {
    /// Render the local consent page (custom provider).
    Consent(ConsentPrompt),
    /// 302 to the external IdP (federated providers).
    Redirect(String),
}

/// Everything the consent page needs.
#[derive(Debug, Clone)]
pub struct ConsentPrompt {
    pub client_name: String,
    pub scopes: Vec<String>,
    /// Local flow: the original request, round-tripped through hidden form
    /// fields to `/oauth/authorize/approve`.
    pub request: Option<AuthorizeRequest>,
    /// Federated flow: the already-minted authorization code, posted to
    /// `/oauth/consent/approve`.
    pub code: Option<String>,
    /// Identity captured from the IdP, shown on the federated consent page.
    pub user: Option<IdentityClaims>,
}

/// Consent decision posted by the user.
pub enum ConsentForm {
    Local {
        approved: bool,
        request: AuthorizeRequest,
    },
    Federated {
        approved: bool,
        code: String,
    },
}

/// Failures in the authorization leg. The variant decides whether the user
/// agent is redirected back to the MCP client or shown an HTML error page:
/// redirects are only safe once the redirect URI has been validated.
#[derive(Debug, Clone)]
pub enum FlowError {
    Redirect {
        redirect_uri: String,
        error: &'static str,
        description: String,
        state: Option<String>,
    },
    Page {
        error: &'static str,
        description: String,
    },
}

impl FlowError {
    pub fn page(error: &'static str, description: impl Into<String>) -> Self {
        Self::Page { error, description: description.into() }
    }
}

/// The contract every provider variant satisfies.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Provider identity for metadata and logs.
    fn info(&self) -> ProviderInfo;

    /// Begin an authorization: local consent or IdP redirect.
    async fn start_authorization(&self, request: AuthorizeRequest)
        -> Result<AuthorizeAction, FlowError>;

    /// Handle the IdP redirect back to us (federated variants only).
    async fn handle_idp_callback(&self, code: &str, state: &str)
        -> Result<ConsentPrompt, FlowError>;

    /// Apply the user's consent decision. Returns the redirect URL that sends
    /// the user agent back to the MCP client (carrying a code or an error).
    async fn complete_authorization(&self, form: ConsentForm) -> Result<String, FlowError>;

    /// Redeem an authorization code.
    async fn exchange_code(
        &self,
        client: &ClientRecord,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, TokenError>;

    /// Rotate a refresh token.
    async fn refresh(
        &self,
        client: &ClientRecord,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenGrant, TokenError>;

    /// Validate a bearer token. `None` covers unknown and expired alike.
    async fn introspect(&self, token: &str) -> Option<AccessTokenRecord>;

    /// Best-effort revocation.
    async fn revoke(&self, client: Option<&ClientRecord>, token: &str);
}

/// Instantiate the provider variant named by configuration.
pub fn build_provider(
    config: Arc<OAuthConfig>,
    store: Arc<CredentialStore>,
) -> anyhow::Result<Arc<dyn OAuthProvider>> {
    let provider: Arc<dyn OAuthProvider> = match config.provider {
        ProviderKind::Custom => Arc::new(CustomProvider::new(config.clone(), store)),
        ProviderKind::Google => Arc::new(GoogleProvider::new(config.clone(), store)?),
        ProviderKind::Azure => Arc::new(AzureProvider::new(config.clone(), store)?),
    };
    info!(
        "[OAuth] Provider ready: {} (issuer: {})",
        provider.info().display_name,
        config.issuer_url
    );
    Ok(provider)
}

/// Apply a consent decision for a federated flow. The authorization code was
/// minted when the IdP callback landed; approval releases it to the MCP
/// client, denial destroys it.
pub(crate) async fn complete_federated_consent(
    store: &CredentialStore,
    form: ConsentForm,
) -> Result<String, FlowError> {
    let (approved, code) = match form {
        ConsentForm::Federated { approved, code } => (approved, code),
        ConsentForm::Local { .. } => {
            return Err(FlowError::page("invalid_request", "Unexpected consent form"));
        }
    };

    let record = store
        .get_code(&code)
        .await
        .ok_or_else(|| FlowError::page("invalid_request", "Unknown or expired authorization code"))?;

    if !approved {
        let _ = store.consume_code(&code).await;
        info!("[OAuth] Authorization denied for client {}", record.client_id);
        return Ok(error_redirect(
            &record.redirect_uri,
            "access_denied",
            "User denied authorization",
            record.original_state.as_deref(),
        ));
    }

    info!("[OAuth] Authorization approved for client {}", record.client_id);
    Ok(code_redirect(&record.redirect_uri, &code, record.original_state.as_deref()))
}

/// Append query parameters to a redirect URI, preserving any existing query.
pub fn append_query(redirect_uri: &str, params: &[(&str, &str)]) -> String {
    let mut url = redirect_uri.to_string();
    for (key, value) in params {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

/// Redirect URL sending the user agent back to the MCP client with an error,
/// always carrying the original `state`.
pub fn error_redirect(
    redirect_uri: &str,
    error: &str,
    description: &str,
    state: Option<&str>,
) -> String {
    let mut params = vec![("error", error), ("error_description", description)];
    if let Some(state) = state {
        params.push(("state", state));
    }
    append_query(redirect_uri, &params)
}

/// Redirect URL delivering a freshly issued authorization code.
pub fn code_redirect(redirect_uri: &str, code: &str, state: Option<&str>) -> String {
    let mut params = vec![("code", code)];
    if let Some(state) = state {
        params.push(("state", state));
    }
    append_query(redirect_uri, &params)
}
