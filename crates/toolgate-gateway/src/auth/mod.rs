//! Token minting, PKCE verification, grant handling, and bearer validation.

pub mod bearer;
pub mod grants;
pub mod pkce;
pub mod tokens;

pub use bearer::{bearer_auth, AuthContext};
pub use grants::{TokenError, TokenGrant};
pub use pkce::PkceChallenge;
