//! Toolgate core types
//!
//! Configuration read from the process environment and the scope policy
//! shared by every provider variant. No I/O beyond `std::env` lives here.

pub mod config;
pub mod scopes;

pub use config::{IdpEndpointOverrides, OAuthConfig, ProviderKind, TokenTtls};
pub use scopes::ScopePolicy;
