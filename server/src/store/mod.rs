//! Shared State Store
//!
//! Thin contract over the external key/value + list/set store that holds
//! all cross-process match state. Any server instance can serve any user
//! because queues, sessions, and markers live here, never in process
//! memory. Multi-key operations that must be atomic (claiming a queued
//! candidate) are expressed as conditional removals so concurrent callers
//! cannot both win.

mod redis;

#[cfg(test)]
pub mod memory;

pub use redis::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

/// Store adapter errors. One variant: the engine treats the store as a
/// black box and does not retry beyond what the client itself guarantees.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend (Redis) failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Atomic primitives over the shared store.
///
/// Keys are plain strings built by [`keys`]; values are strings (ids or
/// JSON documents). `remove_from_list` is the atomic claim primitive: the
/// returned count tells the caller whether it was the one that removed
/// the member.
#[async_trait]
pub trait MatchStore: Clone + Send + Sync + 'static {
    /// Set a string value, optionally with a TTL in seconds.
    async fn put(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<(), StoreError>;

    /// Get a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete a key. Returns whether the key existed; under concurrent
    /// deletes exactly one caller observes `true`.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Append to the tail of a list. Returns the new list length.
    async fn push_back(&self, key: &str, member: &str) -> Result<u64, StoreError>;

    /// Prepend to the head of a list.
    async fn push_front(&self, key: &str, member: &str) -> Result<u64, StoreError>;

    /// Remove the first occurrence of `member` from a list. Returns the
    /// number removed (0 or 1); `1` means this caller claimed the member.
    async fn remove_from_list(&self, key: &str, member: &str) -> Result<u64, StoreError>;

    /// All members of a list, head first.
    async fn list_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Length of a list.
    async fn list_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Add a member to a set.
    async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove a member from a set.
    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// All members of a set, unordered.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Cardinality of a set.
    async fn set_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Set membership test.
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;
}

/// Store key builders for the random-call engine.
pub mod keys {
    use uuid::Uuid;

    /// Global FIFO queue of waiting users (LIST).
    pub const GLOBAL_QUEUE: &str = "rc:queue:global";

    /// Set of session ids with a live session record.
    pub const ACTIVE_SESSIONS: &str = "rc:sessions:active";

    /// Set of user ids currently in an active session.
    pub const ACTIVE_PARTICIPANTS: &str = "rc:participants:active";

    /// Set of every language that has ever had a queue. Lets housekeeping
    /// reach per-language queues whose members' entry records expired.
    pub const LANG_REGISTRY: &str = "rc:queue:langs";

    /// Per-language FIFO queue (LIST). `lang` must already be normalized.
    pub fn lang_queue(lang: &str) -> String {
        format!("rc:queue:lang:{lang}")
    }

    /// A waiting user's queue entry record (JSON, TTL).
    pub fn queue_entry(user_id: Uuid) -> String {
        format!("rc:queue:entry:{user_id}")
    }

    /// A session record (JSON, TTL).
    pub fn session(session_id: Uuid) -> String {
        format!("rc:session:{session_id}")
    }

    /// Index from a user to their current session id (TTL).
    pub fn user_session(user_id: Uuid) -> String {
        format!("rc:session:user:{user_id}")
    }

    /// Recently-paired marker for an unordered user pair (short TTL).
    /// The pair is sorted so both orderings produce the same key.
    pub fn recent_pair(a: Uuid, b: Uuid) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("rc:recent:{lo}:{hi}")
    }

    /// Set of users blocked by `user_id`. Owned by the social layer; the
    /// engine reads membership and appends on report.
    pub fn blocks(user_id: Uuid) -> String {
        format!("blocks:{user_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::keys;
    use uuid::Uuid;

    #[test]
    fn test_recent_pair_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(keys::recent_pair(a, b), keys::recent_pair(b, a));
    }

    #[test]
    fn test_lang_queue_key() {
        assert_eq!(keys::lang_queue("es"), "rc:queue:lang:es");
    }
}
