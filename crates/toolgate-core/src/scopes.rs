//! Scope policy
//!
//! One place decides which scopes a request ends up with. The rules:
//! at `/authorize`, unknown scopes are dropped and an empty result falls back
//! to the defaults; on refresh, the grant can only narrow - the result is the
//! intersection of the request with the original grant, and an empty
//! intersection is a hard `invalid_scope` failure.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ScopePolicy {
    /// Scopes this deployment recognizes at all.
    pub valid: Vec<String>,
    /// Granted when a request names no usable scope.
    pub default: Vec<String>,
}

impl ScopePolicy {
    pub fn new(valid: Vec<String>, default: Vec<String>) -> Self {
        Self { valid, default }
    }

    pub fn default_valid() -> Vec<String> {
        ["read", "write", "payment", "account"].map(String::from).to_vec()
    }

    pub fn default_granted() -> Vec<String> {
        vec!["read".to_string()]
    }

    /// Split a comma- or space-separated scope list, preserving order and
    /// dropping duplicates.
    pub fn parse_list(raw: &str) -> Vec<String> {
        let mut scopes = Vec::new();
        for part in raw.split(|c: char| c == ',' || c.is_whitespace()) {
            let part = part.trim();
            if !part.is_empty() && !scopes.iter().any(|s| s == part) {
                scopes.push(part.to_string());
            }
        }
        scopes
    }

    /// Resolve the scopes granted by an authorization request.
    pub fn for_authorization(&self, requested: Option<&str>) -> Vec<String> {
        let requested = match requested {
            Some(raw) if !raw.trim().is_empty() => Self::parse_list(raw),
            _ => return self.default.clone(),
        };

        let granted: Vec<String> = requested
            .into_iter()
            .filter(|s| self.valid.contains(s))
            .collect();

        if granted.is_empty() {
            self.default.clone()
        } else {
            granted
        }
    }

    /// Resolve the scopes granted by a refresh request against the original
    /// grant. `None` means the request had no overlap with the grant and must
    /// be rejected with `invalid_scope`.
    pub fn for_refresh(granted: &[String], requested: Option<&str>) -> Option<Vec<String>> {
        let requested = match requested {
            Some(raw) if !raw.trim().is_empty() => Self::parse_list(raw),
            _ => return Some(granted.to_vec()),
        };

        let narrowed: Vec<String> = requested
            .into_iter()
            .filter(|s| granted.contains(s))
            .collect();

        if narrowed.is_empty() {
            None
        } else {
            Some(narrowed)
        }
    }
}
