//! HTTP handlers for the OAuth endpoints
//!
//! Error reporting policy for `/authorize`: until the client and its
//! redirect URI have been validated, failures render an HTML page; after
//! that, failures are reported to the MCP client via redirect, always
//! carrying its `state` back unchanged.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    Form,
};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use toolgate_core::ProviderKind;
use toolgate_store::{now_ts, ClientRecord};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{tokens, AuthContext, TokenError};
use crate::providers::{
    error_redirect, AuthorizeAction, AuthorizeRequest, ConsentForm, FlowError,
};

use super::consent;
use super::AppState;

// ─── Health ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!("[Gateway] Health check");
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.provider.info().kind.as_str().to_string(),
    })
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────

#[derive(Serialize)]
pub struct ServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub revocation_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
}

pub async fn oauth_metadata(State(state): State<AppState>) -> Json<ServerMetadata> {
    info!("[Gateway] OAuth metadata request");
    let base = &state.config.issuer_url;
    Json(ServerMetadata {
        issuer: base.clone(),
        authorization_endpoint: format!("{base}/authorize"),
        token_endpoint: format!("{base}/token"),
        registration_endpoint: format!("{base}/register"),
        revocation_endpoint: format!("{base}/revoke"),
        response_types_supported: vec!["code".to_string()],
        grant_types_supported: vec!["authorization_code".to_string(), "refresh_token".to_string()],
        code_challenge_methods_supported: vec!["S256".to_string()],
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".to_string(),
            "client_secret_post".to_string(),
            "none".to_string(),
        ],
        scopes_supported: state.config.scopes.valid.clone(),
    })
}

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub redirect_uris: Option<Vec<String>>,
    pub client_name: Option<String>,
    pub scope: Option<String>,
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub client_id_issued_at: i64,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let redirect_uris = request.redirect_uris.unwrap_or_default();
    if redirect_uris.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_client_metadata",
                "error_description": "redirect_uris is required"
            })),
        )
            .into_response();
    }
    for uri in &redirect_uris {
        if url::Url::parse(uri).is_err() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_redirect_uri",
                    "error_description": format!("Not a valid URI: {uri}")
                })),
            )
                .into_response();
        }
    }

    let auth_method = request
        .token_endpoint_auth_method
        .unwrap_or_else(|| "none".to_string());
    if !matches!(auth_method.as_str(), "none" | "client_secret_basic" | "client_secret_post") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_client_metadata",
                "error_description": format!("Unsupported token_endpoint_auth_method: {auth_method}")
            })),
        )
            .into_response();
    }

    // Confidential clients get a secret issued exactly once; only its hash
    // is stored.
    let client_secret = if auth_method == "none" {
        None
    } else {
        Some(tokens::generate_token())
    };

    let grant_types = if request.grant_types.is_empty() {
        vec!["authorization_code".to_string(), "refresh_token".to_string()]
    } else {
        request.grant_types
    };
    let response_types = if request.response_types.is_empty() {
        vec!["code".to_string()]
    } else {
        request.response_types
    };

    let client_id = Uuid::new_v4().simple().to_string();
    let issued_at = now_ts();

    let record = ClientRecord {
        client_id: client_id.clone(),
        client_secret_hash: client_secret.as_deref().map(tokens::hash_secret),
        redirect_uris: redirect_uris.clone(),
        grant_types: grant_types.clone(),
        response_types: response_types.clone(),
        scope: request.scope.clone(),
        token_endpoint_auth_method: auth_method.clone(),
        client_name: request.client_name.clone(),
        issued_at,
    };

    if state.store.register_client(record).await.is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "server_error" })),
        )
            .into_response();
    }

    info!(
        "[OAuth] Registered client {} ({})",
        client_id,
        request.client_name.as_deref().unwrap_or("unnamed")
    );

    (
        StatusCode::CREATED,
        Json(RegisterResponse {
            client_id,
            client_secret,
            client_id_issued_at: issued_at,
            redirect_uris,
            grant_types,
            response_types,
            token_endpoint_auth_method: auth_method,
            client_name: request.client_name,
            scope: request.scope,
        }),
    )
        .into_response()
}

// ─── Authorization endpoint ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

pub async fn authorize_get(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    authorize(state, params).await
}

/// Some MCP clients POST the authorization request as a form instead.
pub async fn authorize_post(
    State(state): State<AppState>,
    Form(params): Form<AuthorizeParams>,
) -> Response {
    authorize(state, params).await
}

async fn authorize(state: AppState, params: AuthorizeParams) -> Response {
    // Before the redirect URI is validated, errors can only go to an HTML page
    let Some(client_id) = params.client_id.as_deref() else {
        return error_page("invalid_request", "Missing client_id");
    };
    let Some(client) = state.store.get_client(client_id).await else {
        warn!("[OAuth] Authorization request from unknown client: {}", client_id);
        return error_page("invalid_request", "Unknown client");
    };
    let Some(redirect_uri) = params.redirect_uri.as_deref() else {
        return error_page("invalid_request", "Missing redirect_uri");
    };
    if !client.has_redirect_uri(redirect_uri) {
        warn!("[OAuth] redirect_uri not registered for client {}", client_id);
        return error_page("invalid_request", "Redirect URI is not registered for this client");
    }

    // From here on the redirect URI is trusted and errors go back to the client
    let client_state = params.state.clone();
    let fail = |error: &'static str, description: &str| {
        redirect_error(redirect_uri, error, description, client_state.as_deref())
    };

    if params.response_type.as_deref() != Some("code") {
        return fail("unsupported_response_type", "response_type must be 'code'");
    }
    if !client.response_types.iter().any(|t| t == "code") {
        return fail("unauthorized_client", "Client is not registered for the code response type");
    }
    let Some(state_param) = params.state.clone() else {
        return fail("invalid_request", "Missing state");
    };
    let Some(code_challenge) = params.code_challenge.clone() else {
        return fail("invalid_request", "PKCE code_challenge is required");
    };
    let method = params
        .code_challenge_method
        .clone()
        .unwrap_or_else(|| "S256".to_string());
    match method.as_str() {
        "S256" => {}
        "plain" if !client.is_public() => {}
        "plain" => {
            return fail("invalid_request", "plain code_challenge_method is not allowed for public clients");
        }
        _ => return fail("invalid_request", "code_challenge_method must be S256"),
    }

    let scopes = state.config.scopes.for_authorization(params.scope.as_deref());

    let request = AuthorizeRequest {
        client_id: client.client_id.clone(),
        client_name: client.client_name.clone(),
        redirect_uri: redirect_uri.to_string(),
        scopes,
        state: state_param,
        code_challenge,
        code_challenge_method: method,
    };

    match state.provider.start_authorization(request).await {
        Ok(AuthorizeAction::Consent(prompt)) => Html(consent::render_consent(&prompt)).into_response(),
        Ok(AuthorizeAction::Redirect(url)) => found(&url),
        Err(err) => flow_error_response(err),
    }
}

// ─── Consent approval ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LocalConsentForm {
    pub action: Option<String>,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// `POST /oauth/authorize/approve` - consent decision for the custom provider.
pub async fn approve_local(
    State(state): State<AppState>,
    Form(form): Form<LocalConsentForm>,
) -> Response {
    let approved = form.action.as_deref() == Some("approve");
    let request = AuthorizeRequest {
        client_id: form.client_id,
        client_name: None,
        redirect_uri: form.redirect_uri,
        // The form came back through the user agent; re-apply the scope policy
        scopes: state.config.scopes.for_authorization(Some(&form.scope)),
        state: form.state,
        code_challenge: form.code_challenge,
        code_challenge_method: form.code_challenge_method,
    };

    match state
        .provider
        .complete_authorization(ConsentForm::Local { approved, request })
        .await
    {
        Ok(url) => found(&url),
        Err(err) => flow_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct FederatedConsentForm {
    pub action: Option<String>,
    pub code: String,
}

/// `POST /oauth/consent/approve` - consent decision after IdP identity capture.
pub async fn approve_federated(
    State(state): State<AppState>,
    Form(form): Form<FederatedConsentForm>,
) -> Response {
    let approved = form.action.as_deref() == Some("approve");
    match state
        .provider
        .complete_authorization(ConsentForm::Federated { approved, code: form.code })
        .await
    {
        Ok(url) => found(&url),
        Err(err) => flow_error_response(err),
    }
}

// ─── IdP callbacks ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub async fn google_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    idp_callback(state, ProviderKind::Google, params).await
}

pub async fn azure_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    idp_callback(state, ProviderKind::Azure, params).await
}

async fn idp_callback(state: AppState, kind: ProviderKind, params: CallbackParams) -> Response {
    if state.provider.info().kind != kind {
        return error_page("invalid_request", "This identity provider is not configured");
    }

    let Some(corr_state) = params.state.as_deref() else {
        return error_page("invalid_request", "Missing state");
    };

    // The IdP reported an error (user denied, upstream failure). Never leave
    // the user stranded: route back to the MCP client when the pending record
    // still identifies it.
    if let Some(idp_error) = params.error.as_deref() {
        warn!("[OAuth] IdP callback error: {}", idp_error);
        return match state.store.take_pending(corr_state).await {
            Ok(pending) => {
                let description = params
                    .error_description
                    .unwrap_or_else(|| "Identity provider reported an error".to_string());
                found(&error_redirect(
                    &pending.redirect_uri,
                    "access_denied",
                    &description,
                    pending.state.as_deref(),
                ))
            }
            Err(_) => error_page("access_denied", "Identity provider reported an error"),
        };
    }

    let Some(code) = params.code.as_deref() else {
        return error_page("invalid_request", "Missing code");
    };

    match state.provider.handle_idp_callback(code, corr_state).await {
        Ok(prompt) => Html(consent::render_consent(&prompt)).into_response(),
        Err(err) => flow_error_response(err),
    }
}

// ─── Token endpoint ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponseBody {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub scope: String,
}

#[derive(Debug, Serialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    info!(
        "[OAuth] Token request: grant_type={}, client_id={:?}",
        request.grant_type, request.client_id
    );

    let client = match authenticate_client(&state, &headers, &request).await {
        Ok(client) => client,
        Err(err) => return token_error_response(err),
    };

    if !client.grant_types.iter().any(|g| g == &request.grant_type) {
        return token_error_response(TokenError::UnauthorizedClient(format!(
            "Client is not registered for the {} grant",
            request.grant_type
        )));
    }

    let result = match request.grant_type.as_str() {
        "authorization_code" => {
            let Some(code) = request.code.as_deref() else {
                return token_error_response(TokenError::InvalidRequest("Missing code".to_string()));
            };
            let Some(code_verifier) = request.code_verifier.as_deref() else {
                return token_error_response(TokenError::InvalidRequest(
                    "Missing code_verifier".to_string(),
                ));
            };
            let Some(redirect_uri) = request.redirect_uri.as_deref() else {
                return token_error_response(TokenError::InvalidRequest(
                    "Missing redirect_uri".to_string(),
                ));
            };
            state
                .provider
                .exchange_code(&client, code, code_verifier, redirect_uri)
                .await
        }
        "refresh_token" => {
            let Some(refresh_token) = request.refresh_token.as_deref() else {
                return token_error_response(TokenError::InvalidRequest(
                    "Missing refresh_token".to_string(),
                ));
            };
            state
                .provider
                .refresh(&client, refresh_token, request.scope.as_deref())
                .await
        }
        other => Err(TokenError::UnsupportedGrantType(format!(
            "Unsupported grant_type: {other}"
        ))),
    };

    match result {
        Ok(grant) => {
            let mut response = Json(TokenResponseBody {
                access_token: grant.access_token,
                token_type: "Bearer".to_string(),
                expires_in: grant.expires_in,
                refresh_token: grant.refresh_token,
                scope: grant.scope,
            })
            .into_response();
            // RFC 6749 §5.1: token responses must not be cached
            let headers = response.headers_mut();
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            response
        }
        Err(err) => token_error_response(err),
    }
}

// ─── RFC 7009: Token revocation ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
    #[allow(dead_code)] // Accepted per RFC 7009, both token kinds are tried anyway
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// `POST /revoke` - always answers 200, even for unknown tokens.
pub async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<RevokeRequest>,
) -> Response {
    let client = match resolve_client_credentials(&headers, request.client_id.as_deref(), request.client_secret.as_deref()) {
        Some((client_id, secret)) => {
            match state.store.get_client(&client_id).await {
                Some(client) if client_secret_ok(&client, secret.as_deref()) => Some(client),
                _ => None,
            }
        }
        None => None,
    };

    state.provider.revoke(client.as_ref(), &request.token).await;
    (StatusCode::OK, Json(json!({}))).into_response()
}

// ─── Demo tool route ─────────────────────────────────────────────────────

/// `GET /tools/whoami` - a bearer-protected stand-in for the tool surface.
pub async fn whoami(auth: AuthContext) -> Json<serde_json::Value> {
    Json(json!({
        "client_id": auth.client_id,
        "scopes": auth.scopes,
        "user": auth.user.as_ref().map(|u| json!({
            "subject": u.subject,
            "email": u.email,
            "name": u.name,
        })),
    }))
}

// ─── Client authentication ───────────────────────────────────────────────

/// Pull client credentials from HTTP Basic or the form body.
fn resolve_client_credentials(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Option<(String, Option<String>)> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(encoded) = value.strip_prefix("Basic ") {
            let decoded = BASE64_STANDARD.decode(encoded).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (id, secret) = decoded.split_once(':')?;
            return Some((
                urlencoding::decode(id).ok()?.into_owned(),
                Some(urlencoding::decode(secret).ok()?.into_owned()),
            ));
        }
    }
    form_client_id.map(|id| (id.to_string(), form_client_secret.map(String::from)))
}

fn client_secret_ok(client: &ClientRecord, secret: Option<&str>) -> bool {
    match (&client.client_secret_hash, secret) {
        // Confidential clients must present their secret
        (Some(hash), Some(secret)) => tokens::verify_secret(secret, hash),
        (Some(_), None) => false,
        // Public clients authenticate by PKCE only
        (None, _) => true,
    }
}

async fn authenticate_client(
    state: &AppState,
    headers: &HeaderMap,
    request: &TokenRequest,
) -> Result<ClientRecord, TokenError> {
    let (client_id, secret) = resolve_client_credentials(
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .ok_or_else(|| TokenError::InvalidClient("Client authentication required".to_string()))?;

    let client = state
        .store
        .get_client(&client_id)
        .await
        .ok_or_else(|| TokenError::InvalidClient("Unknown client".to_string()))?;

    if !client_secret_ok(&client, secret.as_deref()) {
        warn!("[OAuth] Client secret verification failed for {}", client_id);
        return Err(TokenError::InvalidClient("Client authentication failed".to_string()));
    }

    Ok(client)
}

// ─── Error plumbing ──────────────────────────────────────────────────────

fn error_page(error: &str, description: &str) -> Response {
    (StatusCode::BAD_REQUEST, Html(consent::render_error(error, description))).into_response()
}

/// OAuth redirects use 302 Found.
fn found(url: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
}

fn redirect_error(
    redirect_uri: &str,
    error: &str,
    description: &str,
    state: Option<&str>,
) -> Response {
    found(&error_redirect(redirect_uri, error, description, state))
}

fn flow_error_response(err: FlowError) -> Response {
    match err {
        FlowError::Redirect { redirect_uri, error, description, state } => {
            redirect_error(&redirect_uri, error, &description, state.as_deref())
        }
        FlowError::Page { error, description } => error_page(error, &description),
    }
}

fn token_error_response(err: TokenError) -> Response {
    let status = match err {
        TokenError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
        TokenError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    warn!("[OAuth] Token request failed: {} - {}", err.error_code(), err.description());
    (
        status,
        Json(TokenErrorResponse {
            error: err.error_code().to_string(),
            error_description: Some(err.description().to_string()),
        }),
    )
        .into_response()
}
