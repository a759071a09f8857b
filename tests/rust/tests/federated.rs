//! Federated flow tests (Google-shaped) against a mock IdP

use axum::http::StatusCode;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use toolgate_tests::*;

const REDIRECT_URI: &str = "https://app.example/cb";

async fn mock_idp() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "idp-access-token",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "idp-refresh-token",
            "id_token": "idp-id-token",
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sub": "google-user-1",
            "email": "user@example.com",
            "name": "Test User",
        })))
        .mount(&server)
        .await;

    server
}

// =============================================================================
// Callback without pending state
// =============================================================================

#[tokio::test]
async fn test_callback_without_pending_state_issues_nothing() {
    let idp = mock_idp().await;
    let dir = tempfile::tempdir().unwrap();
    let state = google_state(dir.path(), &idp.uri()).await;
    let app = router(&state);

    let response = get(&app, "/oauth/google/callback?code=foo&state=unknown").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let html = body_string(response).await;
    assert!(html.contains("invalid_request"));

    // Nothing was minted by the rejected callback
    let stats = state.store.stats().await;
    assert_eq!(stats.authorization_codes, 0);
    assert_eq!(stats.access_tokens, 0);
    assert_eq!(stats.refresh_tokens, 0);
}

#[tokio::test]
async fn test_callback_for_wrong_provider_rejected() {
    let idp = mock_idp().await;
    let dir = tempfile::tempdir().unwrap();
    let state = google_state(dir.path(), &idp.uri()).await;
    let app = router(&state);

    let response = get(&app, "/oauth/azure/callback?code=foo&state=unknown").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Full round trip
// =============================================================================

#[tokio::test]
async fn test_federated_round_trip() {
    let idp = mock_idp().await;
    let dir = tempfile::tempdir().unwrap();
    let state = google_state(dir.path(), &idp.uri()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let challenge = s256("abc123");

    // /authorize bounces the user agent to the IdP with our correlation state
    let response = get(
        &app,
        &format!(
            "/authorize?response_type=code&client_id={client_id}&redirect_uri={}&scope=read&state=st1&code_challenge={challenge}&code_challenge_method=S256",
            urlencoding::encode(REDIRECT_URI)
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let idp_url = location(&response);
    assert!(idp_url.starts_with(&format!("{}/authorize", idp.uri())));
    assert_eq!(query_param(&idp_url, "redirect_uri").as_deref(), Some(&*format!("{ISSUER}/oauth/google/callback")));
    let correlation = query_param(&idp_url, "state").unwrap();
    assert_ne!(correlation, "st1");

    // The IdP calls back; we exchange its code, fetch the profile, and show
    // consent for an identified user
    let response = get(
        &app,
        &format!("/oauth/google/callback?code=idp-code&state={correlation}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_string(response).await;
    assert!(html.contains("user@example.com"));
    let code = hidden_field(&html, "code").unwrap();

    // Approval redirects back to the MCP client with our code and its state
    let response = post_form(
        &app,
        "/oauth/consent/approve",
        &[("action", "approve"), ("code", &code)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let redirect = location(&response);
    assert!(redirect.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("st1"));
    assert_eq!(query_param(&redirect, "code").as_deref(), Some(&*code));

    // PKCE is enforced at our token endpoint, not the IdP's
    let response = exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let access_token = body["access_token"].as_str().unwrap();

    // Identity claims from the IdP ride on the access token
    let response = get_bearer(&app, "/tools/whoami", access_token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let who = body_json(response).await;
    assert_eq!(who["user"]["email"], "user@example.com");
    assert_eq!(who["user"]["subject"], "google-user-1");
}

#[tokio::test]
async fn test_duplicate_idp_callback_fails() {
    let idp = mock_idp().await;
    let dir = tempfile::tempdir().unwrap();
    let state = google_state(dir.path(), &idp.uri()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let challenge = s256("abc123");
    let response = get(
        &app,
        &format!(
            "/authorize?response_type=code&client_id={client_id}&redirect_uri={}&scope=read&state=st1&code_challenge={challenge}&code_challenge_method=S256",
            urlencoding::encode(REDIRECT_URI)
        ),
    )
    .await;
    let correlation = query_param(&location(&response), "state").unwrap();

    let first = get(&app, &format!("/oauth/google/callback?code=idp-code&state={correlation}")).await;
    assert_eq!(first.status(), StatusCode::OK);

    // The pending record was consumed; a replayed callback has nothing to bind to
    let second = get(&app, &format!("/oauth/google/callback?code=idp-code&state={correlation}")).await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_idp_token_exchange_failure_redirects_to_client() {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&idp)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let state = google_state(dir.path(), &idp.uri()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let challenge = s256("abc123");
    let response = get(
        &app,
        &format!(
            "/authorize?response_type=code&client_id={client_id}&redirect_uri={}&scope=read&state=st1&code_challenge={challenge}&code_challenge_method=S256",
            urlencoding::encode(REDIRECT_URI)
        ),
    )
    .await;
    let correlation = query_param(&location(&response), "state").unwrap();

    // The upstream failure is translated and routed back to the MCP client
    let response = get(&app, &format!("/oauth/google/callback?code=idp-code&state={correlation}")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let redirect = location(&response);
    assert!(redirect.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("st1"));
}

#[tokio::test]
async fn test_user_denial_at_idp_redirects_to_client() {
    let idp = mock_idp().await;
    let dir = tempfile::tempdir().unwrap();
    let state = google_state(dir.path(), &idp.uri()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let challenge = s256("abc123");
    let response = get(
        &app,
        &format!(
            "/authorize?response_type=code&client_id={client_id}&redirect_uri={}&scope=read&state=st1&code_challenge={challenge}&code_challenge_method=S256",
            urlencoding::encode(REDIRECT_URI)
        ),
    )
    .await;
    let correlation = query_param(&location(&response), "state").unwrap();

    let response = get(
        &app,
        &format!("/oauth/google/callback?error=access_denied&state={correlation}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let redirect = location(&response);
    assert!(redirect.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("st1"));
}

#[tokio::test]
async fn test_denied_federated_consent_destroys_code() {
    let idp = mock_idp().await;
    let dir = tempfile::tempdir().unwrap();
    let state = google_state(dir.path(), &idp.uri()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let challenge = s256("abc123");
    let response = get(
        &app,
        &format!(
            "/authorize?response_type=code&client_id={client_id}&redirect_uri={}&scope=read&state=st1&code_challenge={challenge}&code_challenge_method=S256",
            urlencoding::encode(REDIRECT_URI)
        ),
    )
    .await;
    let correlation = query_param(&location(&response), "state").unwrap();

    let html = body_string(
        get(&app, &format!("/oauth/google/callback?code=idp-code&state={correlation}")).await,
    )
    .await;
    let code = hidden_field(&html, "code").unwrap();

    let response = post_form(
        &app,
        "/oauth/consent/approve",
        &[("action", "deny"), ("code", &code)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(query_param(&location(&response), "error").as_deref(), Some("access_denied"));

    // The code is gone; redeeming it fails
    let response = exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");
}
