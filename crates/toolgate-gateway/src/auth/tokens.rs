//! Opaque token generation and client secret hashing
//!
//! Every credential string (codes, tokens, correlation keys) is 32 bytes from
//! the OS CSPRNG, base64url-encoded without padding. Tokens carry no
//! structure; validation is always a store lookup.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use toolgate_store::CredentialStore;
use tracing::warn;

/// Entropy per token, in bytes.
const TOKEN_BYTES: usize = 32;

/// Generate a fresh opaque token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a token that is not currently live in the store. A collision is
/// vanishingly unlikely; one retry covers it.
pub async fn unique_token(store: &CredentialStore) -> String {
    let token = generate_token();
    if !store.token_in_use(&token).await {
        return token;
    }
    warn!("[Auth] Token collision detected - retrying");
    generate_token()
}

/// SHA-256 hex digest of a client secret. Only the hash is persisted.
pub fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn verify_secret(secret: &str, hash: &str) -> bool {
    hash_secret(secret) == hash
}
