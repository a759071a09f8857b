//! Grant handling shared by every provider variant
//!
//! Code redemption, refresh rotation, introspection, and revocation all work
//! the same regardless of how the user was authenticated; only the
//! authorization leg differs per provider.

use toolgate_core::{OAuthConfig, ScopePolicy};
use toolgate_store::{
    now_ts, AccessTokenRecord, ClientRecord, CredentialStore, RefreshTokenRecord, StoreError,
};
use tracing::{info, warn};

use super::{pkce, tokens};

/// A successful token issuance, serialized by the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub scope: String,
}

/// Failures surfaced by the `/token` endpoint, named by OAuth error code.
#[derive(Debug, Clone)]
pub enum TokenError {
    InvalidRequest(String),
    InvalidClient(String),
    InvalidGrant(String),
    InvalidScope(String),
    UnauthorizedClient(String),
    UnsupportedGrantType(String),
    ServerError(String),
}

impl TokenError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidScope(_) => "invalid_scope",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::ServerError(_) => "server_error",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::InvalidScope(d)
            | Self::UnauthorizedClient(d)
            | Self::UnsupportedGrantType(d)
            | Self::ServerError(d) => d,
        }
    }
}

/// Redeem an authorization code for a token pair.
///
/// The code is consumed atomically: of two concurrent redemptions exactly one
/// succeeds. A replayed code revokes the tokens its first redemption minted.
pub async fn exchange_code(
    store: &CredentialStore,
    config: &OAuthConfig,
    client: &ClientRecord,
    code: &str,
    code_verifier: &str,
    redirect_uri: &str,
) -> Result<TokenGrant, TokenError> {
    let record = store.consume_code(code).await.map_err(|err| match err {
        StoreError::Reused => {
            TokenError::InvalidGrant("Authorization code already redeemed".to_string())
        }
        _ => TokenError::InvalidGrant("Authorization code is invalid or expired".to_string()),
    })?;

    if record.client_id != client.client_id {
        warn!("[OAuth] Authorization code client mismatch");
        return Err(TokenError::InvalidGrant(
            "Authorization code was issued to a different client".to_string(),
        ));
    }

    // Byte-for-byte comparison, per OAuth 2.1
    if record.redirect_uri != redirect_uri {
        warn!("[OAuth] redirect_uri mismatch at token exchange");
        return Err(TokenError::InvalidGrant("redirect_uri mismatch".to_string()));
    }

    if !pkce::verify_challenge(
        &record.code_challenge_method,
        code_verifier,
        &record.code_challenge,
        !client.is_public(),
    ) {
        warn!("[OAuth] PKCE verification failed for client {}", client.client_id);
        return Err(TokenError::InvalidGrant("PKCE verification failed".to_string()));
    }

    let access_token = tokens::unique_token(store).await;
    let refresh_token = tokens::unique_token(store).await;
    let now = now_ts();

    store
        .add_access_token(AccessTokenRecord {
            token: access_token.clone(),
            client_id: client.client_id.clone(),
            scopes: record.scopes.clone(),
            expires_at: now + config.ttls.access_token,
            claims: record.claims.clone(),
        })
        .await;

    store
        .add_refresh_token(RefreshTokenRecord {
            token: refresh_token.clone(),
            client_id: client.client_id.clone(),
            scopes: record.scopes.clone(),
            expires_at: now + config.ttls.refresh_token,
        })
        .await;

    // Keep the code string around so a replay can revoke this pair
    store
        .record_redemption(code, &access_token, &refresh_token, &client.client_id, record.expires_at)
        .await;

    info!("[OAuth] Issued token pair for client {}", client.client_id);

    Ok(TokenGrant {
        access_token,
        expires_in: config.ttls.access_token,
        refresh_token,
        scope: record.scopes.join(" "),
    })
}

/// Rotate a refresh token: new access + refresh tokens, old refresh token
/// atomically invalidated. Scopes can only narrow.
pub async fn refresh(
    store: &CredentialStore,
    config: &OAuthConfig,
    client: &ClientRecord,
    refresh_token: &str,
    requested_scope: Option<&str>,
) -> Result<TokenGrant, TokenError> {
    let record = store.load_refresh_token(refresh_token).await.map_err(|_| {
        TokenError::InvalidGrant("Refresh token is invalid or expired".to_string())
    })?;

    if record.client_id != client.client_id {
        warn!("[OAuth] Refresh token client mismatch");
        return Err(TokenError::InvalidGrant(
            "Refresh token was issued to a different client".to_string(),
        ));
    }

    let granted = ScopePolicy::for_refresh(&record.scopes, requested_scope).ok_or_else(|| {
        TokenError::InvalidScope("Requested scopes exceed the original grant".to_string())
    })?;

    let new_access = tokens::unique_token(store).await;
    let new_refresh = tokens::unique_token(store).await;
    let now = now_ts();

    store
        .rotate_refresh(
            refresh_token,
            RefreshTokenRecord {
                token: new_refresh.clone(),
                client_id: client.client_id.clone(),
                scopes: granted.clone(),
                expires_at: now + config.ttls.refresh_token,
            },
        )
        .await
        .map_err(|_| TokenError::InvalidGrant("Refresh token is invalid or expired".to_string()))?;

    store
        .add_access_token(AccessTokenRecord {
            token: new_access.clone(),
            client_id: client.client_id.clone(),
            scopes: granted.clone(),
            expires_at: now + config.ttls.access_token,
            claims: None,
        })
        .await;

    info!("[OAuth] Rotated refresh token for client {}", client.client_id);

    Ok(TokenGrant {
        access_token: new_access,
        expires_in: config.ttls.access_token,
        refresh_token: new_refresh,
        scope: granted.join(" "),
    })
}

/// Look up an access token for the bearer middleware.
pub async fn introspect(store: &CredentialStore, token: &str) -> Option<AccessTokenRecord> {
    store.load_access_token(token).await.ok()
}

/// Best-effort revocation, bound to the authenticated client when known.
pub async fn revoke(store: &CredentialStore, client: Option<&ClientRecord>, token: &str) {
    store.revoke(token, client.map(|c| c.client_id.as_str())).await;
}
