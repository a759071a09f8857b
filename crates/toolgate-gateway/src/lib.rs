//! Toolgate gateway
//!
//! The OAuth 2.1 authorization server embedded in the Toolgate MCP service:
//! dynamic client registration, authorization code flow with PKCE, opaque
//! token issuance with refresh rotation, bearer validation for tool routes,
//! and optional federation of user authentication to Google or Azure.
//!
//! ## Supported standards
//! - RFC 6749: Authorization Code Grant
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256)
//! - RFC 7009: Token Revocation
//! - RFC 8414: Authorization Server Metadata

pub mod auth;
pub mod providers;
pub mod server;

pub use providers::{build_provider, OAuthProvider};
pub use server::{build_router, AppState, GatewayConfig, GatewayServer};
