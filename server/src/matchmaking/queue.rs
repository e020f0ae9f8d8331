//! Queue Manager
//!
//! Maintains the global FIFO queue and the per-language queues, plus each
//! waiting user's entry record (preference snapshot and enqueue time).
//! Pure queue bookkeeping; no match or session logic lives here.

use uuid::Uuid;

use super::error::MatchResult;
use super::types::{Preferences, QueuedUser};
use crate::store::{keys, MatchStore};

/// Result of an enqueue attempt. Duplicate attempts are rejected rather
/// than merged so a user can never hold two queue positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { position: u64 },
    AlreadyQueued,
    AlreadyInSession,
}

/// Queue bookkeeping over the shared store.
#[derive(Clone)]
pub struct QueueManager<S> {
    store: S,
    entry_ttl_secs: i64,
}

impl<S: MatchStore> QueueManager<S> {
    #[must_use]
    pub const fn new(store: S, entry_ttl_secs: i64) -> Self {
        Self {
            store,
            entry_ttl_secs,
        }
    }

    /// Add a user to the global queue and every requested language queue.
    ///
    /// Fails fast when the user already has an active session or an
    /// existing queue entry. Returns the 1-based global queue position.
    pub async fn enqueue(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
        preferences: Preferences,
    ) -> MatchResult<(EnqueueOutcome, Option<QueuedUser>)> {
        if let Some(raw_id) = self.store.get(&keys::user_session(user_id)).await? {
            let live = match Uuid::parse_str(&raw_id) {
                Ok(session_id) => self.store.get(&keys::session(session_id)).await?.is_some(),
                Err(_) => false,
            };
            if live {
                return Ok((EnqueueOutcome::AlreadyInSession, None));
            }
            // Dangling index: the session record expired or a crash left
            // the index behind after the record delete. Clean it up so the
            // user is not locked out until the index TTL.
            self.store.delete(&keys::user_session(user_id)).await?;
        }
        if self.store.get(&keys::queue_entry(user_id)).await?.is_some() {
            return Ok((EnqueueOutcome::AlreadyQueued, None));
        }

        let entry = QueuedUser::new(user_id, connection_id, preferences);
        self.write_entry(&entry).await?;

        let user_key = user_id.to_string();
        let position = self.store.push_back(keys::GLOBAL_QUEUE, &user_key).await?;
        for lang in entry.preferences.normalized_languages() {
            self.store
                .push_back(&keys::lang_queue(&lang), &user_key)
                .await?;
            // Registry of known language queues, so the stale-queue sweep
            // can find orphans whose entry record (and with it the
            // language snapshot) has expired.
            self.store.add_to_set(keys::LANG_REGISTRY, &lang).await?;
        }

        Ok((EnqueueOutcome::Queued { position }, Some(entry)))
    }

    /// Remove a user from the global queue, every language queue the
    /// stored snapshot names, and delete the entry record. Safe to call
    /// for users that are not queued.
    pub async fn dequeue(&self, user_id: Uuid) -> MatchResult<()> {
        let entry = self.entry(user_id).await?;
        let user_key = user_id.to_string();

        self.store
            .remove_from_list(keys::GLOBAL_QUEUE, &user_key)
            .await?;
        if let Some(entry) = entry {
            self.remove_language_entries(&entry).await?;
        }
        self.store.delete(&keys::queue_entry(user_id)).await?;

        Ok(())
    }

    /// Whether the user has a live queue entry record.
    pub async fn is_queued(&self, user_id: Uuid) -> MatchResult<bool> {
        Ok(self.store.get(&keys::queue_entry(user_id)).await?.is_some())
    }

    /// Read a user's queue entry record.
    pub async fn entry(&self, user_id: Uuid) -> MatchResult<Option<QueuedUser>> {
        match self.store.get(&keys::queue_entry(user_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Atomically claim a queued user: conditionally remove them from the
    /// global queue. Exactly one concurrent caller observes `true`; that
    /// caller then owns the user and the remaining cleanup (language
    /// queues, entry record) cannot race.
    pub async fn claim(&self, entry: &QueuedUser) -> MatchResult<bool> {
        let removed = self
            .store
            .remove_from_list(keys::GLOBAL_QUEUE, &entry.user_id.to_string())
            .await?;
        if removed == 0 {
            return Ok(false);
        }

        self.remove_language_entries(entry).await?;
        self.store.delete(&keys::queue_entry(entry.user_id)).await?;
        Ok(true)
    }

    /// Undo a claim: put the user back at the head of every queue they
    /// were in, so an abandoned match attempt costs them no fairness.
    pub async fn restore(&self, entry: &QueuedUser) -> MatchResult<()> {
        self.write_entry(entry).await?;
        let user_key = entry.user_id.to_string();
        self.store.push_front(keys::GLOBAL_QUEUE, &user_key).await?;
        for lang in entry.preferences.normalized_languages() {
            self.store
                .push_front(&keys::lang_queue(&lang), &user_key)
                .await?;
        }
        Ok(())
    }

    /// Current global queue depth.
    pub async fn depth(&self) -> MatchResult<u64> {
        Ok(self.store.list_len(keys::GLOBAL_QUEUE).await?)
    }

    /// All members of the global queue, head first. Used by housekeeping.
    pub async fn global_members(&self) -> MatchResult<Vec<Uuid>> {
        let members = self.store.list_members(keys::GLOBAL_QUEUE).await?;
        Ok(members
            .iter()
            .filter_map(|m| Uuid::parse_str(m).ok())
            .collect())
    }

    /// Drop a raw member from the global queue without touching records.
    /// Used by housekeeping for orphaned members.
    pub async fn drop_orphan(&self, user_id: Uuid) -> MatchResult<()> {
        self.store
            .remove_from_list(keys::GLOBAL_QUEUE, &user_id.to_string())
            .await?;
        Ok(())
    }

    /// Every language that has had a preference queue. Used by
    /// housekeeping; entries are never removed, the set is bounded by the
    /// number of distinct languages ever requested.
    pub async fn known_languages(&self) -> MatchResult<Vec<String>> {
        Ok(self.store.set_members(keys::LANG_REGISTRY).await?)
    }

    /// All members of one language queue, head first. Used by housekeeping.
    pub async fn language_members(&self, lang: &str) -> MatchResult<Vec<Uuid>> {
        let members = self.store.list_members(&keys::lang_queue(lang)).await?;
        Ok(members
            .iter()
            .filter_map(|m| Uuid::parse_str(m).ok())
            .collect())
    }

    /// Drop a raw member from one language queue. Used by housekeeping for
    /// members whose entry record (and language snapshot) expired.
    pub async fn drop_language_orphan(&self, lang: &str, user_id: Uuid) -> MatchResult<()> {
        self.store
            .remove_from_list(&keys::lang_queue(lang), &user_id.to_string())
            .await?;
        Ok(())
    }

    async fn write_entry(&self, entry: &QueuedUser) -> MatchResult<()> {
        let raw = serde_json::to_string(entry)?;
        self.store
            .put(&keys::queue_entry(entry.user_id), &raw, Some(self.entry_ttl_secs))
            .await?;
        Ok(())
    }

    async fn remove_language_entries(&self, entry: &QueuedUser) -> MatchResult<()> {
        let user_key = entry.user_id.to_string();
        for lang in entry.preferences.normalized_languages() {
            self.store
                .remove_from_list(&keys::lang_queue(&lang), &user_key)
                .await?;
        }
        Ok(())
    }
}
