//! Bearer token middleware for tool routes
//!
//! Validates `Authorization: Bearer <token>` on every protected request and
//! injects an [`AuthContext`] into request extensions for handlers to
//! extract. Failures answer 401 with a `WWW-Authenticate` challenge.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use toolgate_store::IdentityClaims;
use tracing::{debug, warn};

use crate::server::AppState;

/// Identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Present when a federated provider captured the end user's identity.
    pub user: Option<IdentityClaims>,
}

impl AuthContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or((StatusCode::UNAUTHORIZED, "Missing authentication context"))
    }
}

/// Axum middleware guarding tool routes.
pub async fn bearer_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match header_value {
        Some(value) if value.starts_with("Bearer ") => &value[7..],
        Some(_) => {
            warn!("[Auth] Malformed Authorization header");
            return unauthorized("invalid_request", "Malformed Authorization header");
        }
        None => {
            debug!("[Auth] Missing Authorization header");
            return unauthorized("invalid_token", "Missing access token");
        }
    };

    match state.provider.introspect(token).await {
        Some(record) => {
            debug!("[Auth] Valid bearer token for client {}", record.client_id);
            request.extensions_mut().insert(AuthContext {
                client_id: record.client_id,
                scopes: record.scopes,
                user: record.claims,
            });
            next.run(request).await
        }
        None => {
            warn!("[Auth] Invalid or expired bearer token");
            unauthorized("invalid_token", "Token is invalid or expired")
        }
    }
}

fn unauthorized(error: &str, description: &str) -> Response {
    let challenge = format!(r#"Bearer error="{error}", error_description="{description}""#);
    let body = serde_json::json!({
        "error": error,
        "error_description": description,
    });
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        axum::Json(body),
    )
        .into_response()
}
