//! Session Lifecycle Manager
//!
//! Creates, reads, and terminates call sessions and keeps the
//! user-to-session indices consistent. State only moves forward
//! (`connecting -> connected -> ended`); termination is idempotent under
//! races because the session record delete is the commit point.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::error::MatchResult;
use super::types::{CallSession, QueuedUser, SessionState};
use crate::store::{keys, MatchStore};

/// Session lifecycle over the shared store.
#[derive(Clone)]
pub struct SessionService<S> {
    store: S,
    session_ttl_secs: i64,
    recent_pair_ttl_secs: i64,
}

impl<S: MatchStore> SessionService<S> {
    #[must_use]
    pub const fn new(store: S, session_ttl_secs: i64, recent_pair_ttl_secs: i64) -> Self {
        Self {
            store,
            session_ttl_secs,
            recent_pair_ttl_secs,
        }
    }

    /// Create a session for a claimed pair. Both users must already be
    /// removed from every queue (the engine's claim did that); this writes
    /// the session record, both index entries, the active sets, and the
    /// recently-paired marker, all with a TTL so a crashed process cannot
    /// leave immortal state.
    pub async fn create(
        &self,
        requester: &QueuedUser,
        candidate: &QueuedUser,
        matched_language: Option<String>,
    ) -> MatchResult<CallSession> {
        let session = CallSession {
            id: Uuid::now_v7(),
            user_a: requester.user_id,
            user_b: candidate.user_id,
            connection_a: requester.connection_id,
            connection_b: candidate.connection_id,
            matched_language,
            state: SessionState::Connecting,
            started_at: Utc::now(),
            connected_at: None,
            preferences_a: requester.preferences.clone(),
            preferences_b: candidate.preferences.clone(),
        };

        self.write(&session).await?;
        let id_key = session.id.to_string();
        self.store
            .put(
                &keys::user_session(session.user_a),
                &id_key,
                Some(self.session_ttl_secs),
            )
            .await?;
        self.store
            .put(
                &keys::user_session(session.user_b),
                &id_key,
                Some(self.session_ttl_secs),
            )
            .await?;
        self.store.add_to_set(keys::ACTIVE_SESSIONS, &id_key).await?;
        self.store
            .add_to_set(keys::ACTIVE_PARTICIPANTS, &session.user_a.to_string())
            .await?;
        self.store
            .add_to_set(keys::ACTIVE_PARTICIPANTS, &session.user_b.to_string())
            .await?;
        self.store
            .put(
                &keys::recent_pair(session.user_a, session.user_b),
                "1",
                Some(self.recent_pair_ttl_secs),
            )
            .await?;

        debug!(session_id = %session.id, user_a = %session.user_a, user_b = %session.user_b, "Session created");
        Ok(session)
    }

    /// Read a session record.
    pub async fn get(&self, session_id: Uuid) -> MatchResult<Option<CallSession>> {
        match self.store.get(&keys::session(session_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Resolve a user's current session. A dangling index entry (session
    /// record expired or gone) is cleaned up and treated as no session.
    pub async fn get_for_user(&self, user_id: Uuid) -> MatchResult<Option<CallSession>> {
        let Some(raw_id) = self.store.get(&keys::user_session(user_id)).await? else {
            return Ok(None);
        };
        let Ok(session_id) = Uuid::parse_str(&raw_id) else {
            self.store.delete(&keys::user_session(user_id)).await?;
            return Ok(None);
        };
        match self.get(session_id).await? {
            Some(session) => Ok(Some(session)),
            None => {
                self.store.delete(&keys::user_session(user_id)).await?;
                Ok(None)
            }
        }
    }

    /// Advance a session to `connected`. Idempotent when already
    /// connected; a no-op (`None`) when the session no longer exists.
    pub async fn mark_connected(&self, session_id: Uuid) -> MatchResult<Option<CallSession>> {
        let Some(mut session) = self.get(session_id).await? else {
            return Ok(None);
        };
        if session.state == SessionState::Connecting {
            session.state = SessionState::Connected;
            session.connected_at = Some(Utc::now());
            self.write(&session).await?;
        }
        Ok(Some(session))
    }

    /// Tear down a session: delete the record, both index entries, and
    /// the active-set memberships. Returns the ended session exactly once;
    /// a second concurrent caller observes `None`.
    pub async fn end(&self, session_id: Uuid) -> MatchResult<Option<CallSession>> {
        let Some(session) = self.get(session_id).await? else {
            return Ok(None);
        };

        // The record delete is the commit point for racing terminators.
        if !self.store.delete(&keys::session(session_id)).await? {
            return Ok(None);
        }

        let id_key = session_id.to_string();
        self.store.delete(&keys::user_session(session.user_a)).await?;
        self.store.delete(&keys::user_session(session.user_b)).await?;
        self.store
            .remove_from_set(keys::ACTIVE_SESSIONS, &id_key)
            .await?;
        self.store
            .remove_from_set(keys::ACTIVE_PARTICIPANTS, &session.user_a.to_string())
            .await?;
        self.store
            .remove_from_set(keys::ACTIVE_PARTICIPANTS, &session.user_b.to_string())
            .await?;

        debug!(session_id = %session_id, "Session ended");
        Ok(Some(session))
    }

    /// All ids in the active-session set. Used by housekeeping.
    pub async fn active_ids(&self) -> MatchResult<Vec<Uuid>> {
        let members = self.store.set_members(keys::ACTIVE_SESSIONS).await?;
        Ok(members
            .iter()
            .filter_map(|m| Uuid::parse_str(m).ok())
            .collect())
    }

    /// Drop an id from the active-session set without touching records.
    /// Used by housekeeping for orphaned ids.
    pub async fn drop_orphan(&self, session_id: Uuid) -> MatchResult<()> {
        self.store
            .remove_from_set(keys::ACTIVE_SESSIONS, &session_id.to_string())
            .await?;
        Ok(())
    }

    /// Active session / participant counts for stats.
    pub async fn counts(&self) -> MatchResult<(u64, u64)> {
        let sessions = self.store.set_len(keys::ACTIVE_SESSIONS).await?;
        let participants = self.store.set_len(keys::ACTIVE_PARTICIPANTS).await?;
        Ok((sessions, participants))
    }

    async fn write(&self, session: &CallSession) -> MatchResult<()> {
        let raw = serde_json::to_string(session)?;
        self.store
            .put(&keys::session(session.id), &raw, Some(self.session_ttl_secs))
            .await?;
        Ok(())
    }
}
