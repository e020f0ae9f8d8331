//! In-memory store adapter for tests.
//!
//! Mirrors the Redis adapter's semantics closely enough for engine tests:
//! FIFO lists, unordered sets, and lazily-enforced TTLs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{MatchStore, StoreError};

#[derive(Default)]
struct Inner {
    values: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, HashSet<String>>,
}

impl Inner {
    /// Drop an expired value before reading it.
    fn prune(&mut self, key: &str) {
        if let Some((_, Some(deadline))) = self.values.get(key) {
            if Instant::now() >= *deadline {
                self.values.remove(key);
            }
        }
    }
}

/// Shared in-memory store. Cloning shares the underlying state, like
/// cloning a Redis client.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }

    /// Force-expire a value key, simulating TTL decay.
    pub fn expire_now(&self, key: &str) {
        self.lock().values.remove(key);
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn put(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<(), StoreError> {
        let deadline = ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs.max(0) as u64));
        self.lock()
            .values
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock();
        inner.prune(key);
        Ok(inner.values.get(key).map(|(v, _)| v.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        inner.prune(key);
        Ok(inner.values.remove(key).is_some())
    }

    async fn push_back(&self, key: &str, member: &str) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_back(member.to_string());
        Ok(list.len() as u64)
    }

    async fn push_front(&self, key: &str, member: &str) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_front(member.to_string());
        Ok(list.len() as u64)
    }

    async fn remove_from_list(&self, key: &str, member: &str) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        if let Some(list) = inner.lists.get_mut(key) {
            if let Some(pos) = list.iter().position(|m| m == member) {
                list.remove(pos);
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn list_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.lock().lists.get(key).map_or(0, |list| list.len() as u64))
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(set) = self.lock().sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_len(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.lock().sets.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .sets
            .get(key)
            .is_some_and(|set| set.contains(member)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_is_fifo() {
        let store = MemoryStore::new();
        store.push_back("q", "a").await.unwrap();
        store.push_back("q", "b").await.unwrap();
        store.push_front("q", "z").await.unwrap();

        let members = store.list_members("q").await.unwrap();
        assert_eq!(members, vec!["z", "a", "b"]);
    }

    #[tokio::test]
    async fn test_remove_from_list_claims_once() {
        let store = MemoryStore::new();
        store.push_back("q", "a").await.unwrap();

        assert_eq!(store.remove_from_list("q", "a").await.unwrap(), 1);
        assert_eq!(store.remove_from_list("q", "a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_reports_existence_once() {
        let store = MemoryStore::new();
        store.put("k", "v", None).await.unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_value_is_gone() {
        let store = MemoryStore::new();
        store.put("k", "v", Some(60)).await.unwrap();
        store.expire_now("k");
        assert!(store.get("k").await.unwrap().is_none());
    }
}
