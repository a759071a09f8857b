//! End-to-end authorization flow tests (custom provider)

use axum::http::StatusCode;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use toolgate_tests::*;

const REDIRECT_URI: &str = "https://app.example/cb";

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_full_code_flow_issues_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let code = obtain_code(&app, &client_id, REDIRECT_URI, "read", "st1", "abc123").await;

    let response = exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "no-store"
    );

    let body = body_json(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["scope"], "read");

    let access_token = body["access_token"].as_str().unwrap();
    let refresh_token = body["refresh_token"].as_str().unwrap();
    assert_ne!(access_token, refresh_token);

    // 32 bytes of entropy, base64url without padding
    assert_eq!(URL_SAFE_NO_PAD.decode(access_token).unwrap().len(), 32);
    assert_eq!(URL_SAFE_NO_PAD.decode(refresh_token).unwrap().len(), 32);
}

#[tokio::test]
async fn test_denied_consent_redirects_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let challenge = s256("abc123");

    let response = post_form(
        &app,
        "/oauth/authorize/approve",
        &[
            ("action", "deny"),
            ("client_id", &client_id),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "read"),
            ("state", "st1"),
            ("code_challenge", &challenge),
            ("code_challenge_method", "S256"),
        ],
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let redirect = location(&response);
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("st1"));
    assert!(query_param(&redirect, "code").is_none());
}

// =============================================================================
// Refresh rotation
// =============================================================================

#[tokio::test]
async fn test_refresh_rotates_and_old_token_dies() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let code = obtain_code(&app, &client_id, REDIRECT_URI, "read", "st1", "abc123").await;
    let body = body_json(exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await).await;
    let r1 = body["refresh_token"].as_str().unwrap().to_string();

    let response = post_form(
        &app,
        "/token",
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", &r1),
            ("client_id", &client_id),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let refreshed = body_json(response).await;
    let r2 = refreshed["refresh_token"].as_str().unwrap();
    assert_ne!(r2, r1);
    assert_eq!(refreshed["scope"], "read");

    // R1 was rotated out and is no longer redeemable
    let response = post_form(
        &app,
        "/token",
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", &r1),
            ("client_id", &client_id),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");
}

// =============================================================================
// PKCE
// =============================================================================

#[tokio::test]
async fn test_pkce_mismatch_invalidates_code() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let code = obtain_code(&app, &client_id, REDIRECT_URI, "read", "st1", "abc123").await;

    let response = exchange_code(&app, &client_id, &code, "wrong", REDIRECT_URI).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");

    // The failed attempt consumed the code; the correct verifier is too late
    let response = exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_code_redeemable_at_most_once() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let code = obtain_code(&app, &client_id, REDIRECT_URI, "read", "st1", "abc123").await;

    let first = exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await;
    assert_eq!(first.status(), StatusCode::OK);
    let tokens = body_json(first).await;

    let replay = exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(replay).await["error"], "invalid_grant");

    // Replay revoked the tokens the first redemption produced
    let access_token = tokens["access_token"].as_str().unwrap();
    let response = get_bearer(&app, "/tools/whoami", access_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Scope narrowing on refresh
// =============================================================================

#[tokio::test]
async fn test_refresh_scope_enlargement_narrows_to_grant() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let code = obtain_code(&app, &client_id, REDIRECT_URI, "read", "st1", "abc123").await;
    let body = body_json(exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await).await;
    let r1 = body["refresh_token"].as_str().unwrap().to_string();

    // Requesting "read write" against a "read" grant yields the intersection
    let response = post_form(
        &app,
        "/token",
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", &r1),
            ("client_id", &client_id),
            ("scope", "read write"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["scope"], "read");
}

// =============================================================================
// Bearer middleware
// =============================================================================

#[tokio::test]
async fn test_bearer_middleware_accepts_valid_token() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let code = obtain_code(&app, &client_id, REDIRECT_URI, "read", "st1", "abc123").await;
    let body = body_json(exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await).await;
    let access_token = body["access_token"].as_str().unwrap().to_string();

    let response = get_bearer(&app, "/tools/whoami", &access_token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let who = body_json(response).await;
    assert_eq!(who["client_id"].as_str().unwrap(), client_id);
    assert_eq!(who["scopes"][0], "read");
}

#[tokio::test]
async fn test_bearer_middleware_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let response = get_bearer(&app, "/tools/whoami", "not-a-token").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers().get("www-authenticate").unwrap().to_str().unwrap();
    assert!(challenge.contains("invalid_token"));
}

// =============================================================================
// Metadata, revocation, validation
// =============================================================================

#[tokio::test]
async fn test_metadata_document() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let response = get(&app, "/.well-known/oauth-authorization-server").await;
    assert_eq!(response.status(), StatusCode::OK);
    let meta = body_json(response).await;

    assert_eq!(meta["issuer"], ISSUER);
    assert_eq!(meta["authorization_endpoint"], format!("{ISSUER}/authorize"));
    assert_eq!(meta["token_endpoint"], format!("{ISSUER}/token"));
    assert_eq!(meta["registration_endpoint"], format!("{ISSUER}/register"));
    assert_eq!(meta["revocation_endpoint"], format!("{ISSUER}/revoke"));
    assert_eq!(meta["response_types_supported"][0], "code");
    assert_eq!(meta["code_challenge_methods_supported"][0], "S256");
    assert_eq!(meta["grant_types_supported"][1], "refresh_token");
    assert!(meta["scopes_supported"].as_array().unwrap().iter().any(|s| s == "read"));
}

#[tokio::test]
async fn test_revoke_always_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let code = obtain_code(&app, &client_id, REDIRECT_URI, "read", "st1", "abc123").await;
    let body = body_json(exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await).await;
    let access_token = body["access_token"].as_str().unwrap().to_string();

    let response = post_form(&app, "/revoke", &[("token", &access_token), ("client_id", &client_id)]).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Revoked token no longer passes the middleware
    let response = get_bearer(&app, "/tools/whoami", &access_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Unknown tokens still answer 200
    let response = post_form(&app, "/revoke", &[("token", "unknown")]).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_authorize_unknown_client_renders_html_error() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let response = get(
        &app,
        "/authorize?response_type=code&client_id=ghost&redirect_uri=https%3A%2F%2Fapp.example%2Fcb&state=st1&code_challenge=x&code_challenge_method=S256",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("Unknown client"));
}

#[tokio::test]
async fn test_authorize_missing_challenge_redirects_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let client_id = register_client(&app, REDIRECT_URI).await;
    let response = get(
        &app,
        &format!(
            "/authorize?response_type=code&client_id={client_id}&redirect_uri={}&state=st1",
            urlencoding::encode(REDIRECT_URI)
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let redirect = location(&response);
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("invalid_request"));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("st1"));
}

#[tokio::test]
async fn test_register_requires_redirect_uris() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let response = post_json(&app, "/register", serde_json::json!({ "client_name": "No URIs" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_confidential_client_gets_secret_and_must_use_it() {
    let dir = tempfile::tempdir().unwrap();
    let state = custom_state(dir.path()).await;
    let app = router(&state);

    let response = post_json(
        &app,
        "/register",
        serde_json::json!({
            "client_name": "Confidential App",
            "redirect_uris": [REDIRECT_URI],
            "token_endpoint_auth_method": "client_secret_post",
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let client_id = body["client_id"].as_str().unwrap().to_string();
    let client_secret = body["client_secret"].as_str().unwrap().to_string();

    let code = obtain_code(&app, &client_id, REDIRECT_URI, "read", "st1", "abc123").await;

    // Missing secret: rejected before the grant is touched
    let response = exchange_code(&app, &client_id, &code, "abc123", REDIRECT_URI).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_client");

    // With the secret in the body the exchange goes through
    let response = post_form(
        &app,
        "/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", "abc123"),
            ("client_id", &client_id),
            ("client_secret", &client_secret),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}
