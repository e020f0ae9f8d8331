//! Authentication error types.

use thiserror::Error;

/// Errors from token validation.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token is malformed, has a bad signature, or is the wrong type.
    #[error("Invalid token")]
    InvalidToken,

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Key material problem.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
