//! Redis-backed store adapter.
//!
//! All operations map 1:1 onto Redis primitives; `remove_from_list` is
//! `LREM`, whose removal count makes it usable as a claim.

use async_trait::async_trait;
use fred::error::Error as FredError;
use fred::prelude::*;

use super::{MatchStore, StoreError};

/// Store adapter over a connected [`fred`] Redis client.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Access the underlying client (health checks).
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

impl From<FredError> for StoreError {
    fn from(err: FredError) -> Self {
        Self::Backend(err.to_string())
    }
}

#[async_trait]
impl MatchStore for RedisStore {
    async fn put(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<(), StoreError> {
        let expire = ttl_secs.map(Expiration::EX);
        let _: () = self.client.set(key, value, expire, None, false).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.client.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed: i64 = self.client.del(key).await?;
        Ok(removed > 0)
    }

    async fn push_back(&self, key: &str, member: &str) -> Result<u64, StoreError> {
        let len: i64 = self.client.rpush(key, member).await?;
        Ok(len.max(0) as u64)
    }

    async fn push_front(&self, key: &str, member: &str) -> Result<u64, StoreError> {
        let len: i64 = self.client.lpush(key, member).await?;
        Ok(len.max(0) as u64)
    }

    async fn remove_from_list(&self, key: &str, member: &str) -> Result<u64, StoreError> {
        let removed: i64 = self.client.lrem(key, 1, member).await?;
        Ok(removed.max(0) as u64)
    }

    async fn list_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let members: Vec<String> = self.client.lrange(key, 0, -1).await?;
        Ok(members)
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let len: i64 = self.client.llen(key).await?;
        Ok(len.max(0) as u64)
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let _: i64 = self.client.sadd(key, member).await?;
        Ok(())
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let _: i64 = self.client.srem(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let members: Vec<String> = self.client.smembers(key).await?;
        Ok(members)
    }

    async fn set_len(&self, key: &str) -> Result<u64, StoreError> {
        let len: i64 = self.client.scard(key).await?;
        Ok(len.max(0) as u64)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let contains: bool = self.client.sismember(key, member).await?;
        Ok(contains)
    }
}
