//! Shared helpers for the integration suite
//!
//! Requests are driven through the axum router with `tower::ServiceExt`, so
//! the full HTTP surface is exercised without binding sockets.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use toolgate_core::{IdpEndpointOverrides, OAuthConfig, ProviderKind};
use toolgate_gateway::{build_provider, build_router, AppState};
use toolgate_store::CredentialStore;

pub const ISSUER: &str = "http://localhost:8000";

/// App state backed by the custom provider and a store under `dir`.
pub async fn custom_state(dir: &Path) -> AppState {
    let config = Arc::new(OAuthConfig::for_issuer(ISSUER, dir));
    state_for(config, dir).await
}

/// App state backed by the Google provider with IdP endpoints pointed at a
/// mock server.
pub async fn google_state(dir: &Path, idp_base: &str) -> AppState {
    let mut config = OAuthConfig::for_issuer(ISSUER, dir);
    config.provider = ProviderKind::Google;
    config.client_id = Some("idp-client".to_string());
    config.client_secret = Some("idp-secret".to_string());
    config.idp_endpoints = IdpEndpointOverrides {
        authorization_endpoint: Some(format!("{idp_base}/authorize")),
        token_endpoint: Some(format!("{idp_base}/token")),
        userinfo_endpoint: Some(format!("{idp_base}/userinfo")),
    };
    state_for(Arc::new(config), dir).await
}

async fn state_for(config: Arc<OAuthConfig>, dir: &Path) -> AppState {
    let store = Arc::new(CredentialStore::open(dir).await.unwrap());
    let provider = build_provider(config.clone(), store.clone()).unwrap();
    AppState { config, store, provider }
}

pub fn router(state: &AppState) -> Router {
    build_router(state.clone(), false)
}

pub async fn get(router: &Router, uri: &str) -> Response<Body> {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn get_bearer(router: &Router, uri: &str, token: &str) -> Response<Body> {
    router
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn post_json(router: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn post_form(router: &Router, uri: &str, pairs: &[(&str, &str)]) -> Response<Body> {
    let body = pairs
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// The `Location` header of a redirect response.
pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("redirect must carry a Location header")
        .to_str()
        .unwrap()
        .to_string()
}

/// Extract one query parameter from a URL.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Pull a hidden form field value out of a consent page.
pub fn hidden_field(html: &str, name: &str) -> Option<String> {
    let marker = format!("name=\"{name}\" value=\"");
    let start = html.find(&marker)? + marker.len();
    let end = html[start..].find('"')? + start;
    Some(html[start..end].to_string())
}

/// S256 challenge for a verifier, for driving PKCE from tests.
pub fn s256(verifier: &str) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use sha2::{Digest, Sha256};
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Register a public client and return its `client_id`.
pub async fn register_client(router: &Router, redirect_uri: &str) -> String {
    let response = post_json(
        router,
        "/register",
        serde_json::json!({
            "client_name": "Test App",
            "redirect_uris": [redirect_uri],
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["client_id"].as_str().unwrap().to_string()
}

/// Drive the custom-provider flow from `/authorize` through consent approval
/// and return the authorization code delivered to the client redirect.
pub async fn obtain_code(
    router: &Router,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    state: &str,
    verifier: &str,
) -> String {
    let challenge = s256(verifier);
    let uri = format!(
        "/authorize?response_type=code&client_id={client_id}&redirect_uri={}&scope={}&state={state}&code_challenge={challenge}&code_challenge_method=S256",
        urlencoding::encode(redirect_uri),
        urlencoding::encode(scope),
    );

    let response = get(router, &uri).await;
    assert_eq!(response.status(), StatusCode::OK, "expected consent page");
    let html = body_string(response).await;

    let response = post_form(
        router,
        "/oauth/authorize/approve",
        &[
            ("action", "approve"),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("scope", &hidden_field(&html, "scope").unwrap()),
            ("state", state),
            ("code_challenge", &challenge),
            ("code_challenge_method", "S256"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let redirect = location(&response);
    assert!(redirect.starts_with(redirect_uri));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some(state));
    query_param(&redirect, "code").expect("redirect must carry a code")
}

/// Exchange an authorization code at `/token`.
pub async fn exchange_code(
    router: &Router,
    client_id: &str,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> Response<Body> {
    post_form(
        router,
        "/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
            ("client_id", client_id),
        ],
    )
    .await
}
