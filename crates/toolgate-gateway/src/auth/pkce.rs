//! PKCE (Proof Key for Code Exchange)
//!
//! Implements RFC 7636. `S256` is the required method; `plain` is honored
//! only for confidential clients and rejected for public ones.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// PKCE code verifier and challenge pair. Servers only verify; generation
/// exists for the test suite and example clients.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub method: String,
}

impl PkceChallenge {
    /// Generate a fresh verifier/challenge pair (S256).
    pub fn generate() -> Self {
        let verifier = super::tokens::generate_token();
        let challenge = s256(&verifier);
        Self {
            verifier,
            challenge,
            method: "S256".to_string(),
        }
    }

    /// Derive the S256 challenge for an arbitrary verifier.
    pub fn challenge_for(verifier: &str) -> String {
        s256(verifier)
    }
}

fn s256(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Verify an S256 challenge.
pub fn verify_s256(verifier: &str, challenge: &str) -> bool {
    s256(verifier) == challenge
}

/// Verify a presented verifier against the stored challenge and method.
/// Any mismatch, unknown method, or `plain` from a public client fails hard.
pub fn verify_challenge(
    method: &str,
    verifier: &str,
    challenge: &str,
    confidential_client: bool,
) -> bool {
    match method {
        "S256" => verify_s256(verifier, challenge),
        "plain" => confidential_client && verifier == challenge,
        _ => false,
    }
}
