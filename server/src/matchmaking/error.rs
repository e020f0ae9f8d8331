//! Matchmaking Errors

use thiserror::Error;

use crate::store::StoreError;

/// Errors from queue, matching, and session operations.
///
/// Not-found and concurrent-termination cases are not errors here; those
/// surface as `None`/no-op results because racing teardown is expected.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Shared store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored record failed to (de)serialize.
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),
}

impl From<serde_json::Error> for MatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRecord(err.to_string())
    }
}

pub type MatchResult<T> = Result<T, MatchError>;
