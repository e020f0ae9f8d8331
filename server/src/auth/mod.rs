//! Authentication
//!
//! Access-token verification for WebSocket upgrades. Token issuance
//! lives in the separate account service.

pub mod error;
pub mod jwt;

pub use error::{AuthError, AuthResult};
