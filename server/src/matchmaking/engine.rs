//! Matching Engine
//!
//! Scans the preference queues (mutual language match) and then the global
//! queue for a partner, and turns candidate selection plus queue removal
//! into a single atomic claim so two concurrent matchers can never both
//! win the same candidate.

use tracing::debug;
use uuid::Uuid;

use super::error::MatchResult;
use super::queue::QueueManager;
use super::types::QueuedUser;
use crate::store::{keys, MatchStore};

/// Bound on find-claim retries under contention. Each retry re-reads the
/// queues, which have changed whenever a claim fails.
const MAX_CLAIM_ATTEMPTS: usize = 5;

/// A successfully claimed pairing: both users are already removed from
/// every queue and are ready for session creation.
#[derive(Debug, Clone)]
pub struct ClaimedMatch {
    pub candidate: QueuedUser,
    pub matched_language: Option<String>,
}

/// The matching algorithm over the shared store.
#[derive(Clone)]
pub struct MatchEngine<S> {
    store: S,
    queue: QueueManager<S>,
}

impl<S: MatchStore> MatchEngine<S> {
    #[must_use]
    pub const fn new(store: S, queue: QueueManager<S>) -> Self {
        Self { store, queue }
    }

    /// Find a partner for `requester` and atomically claim both sides.
    ///
    /// Scanning never consumes a slot; only the conditional removal from
    /// the global queue does. When the candidate claim is lost to a
    /// concurrent matcher the scan is retried. When the requester's own
    /// claim is lost (another process matched them first), the claimed
    /// candidate is restored to the head of the queue and `None` is
    /// returned; the requester will hear about their match from the
    /// process that won them.
    pub async fn try_match(&self, requester: &QueuedUser) -> MatchResult<Option<ClaimedMatch>> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let Some((candidate, matched_language)) = self.find_match(requester).await? else {
                return Ok(None);
            };

            if !self.queue.claim(&candidate).await? {
                debug!(
                    candidate = %candidate.user_id,
                    "Candidate claimed by concurrent matcher, rescanning"
                );
                continue;
            }

            if !self.queue.claim(requester).await? {
                debug!(
                    requester = %requester.user_id,
                    "Requester already matched elsewhere, restoring candidate"
                );
                self.queue.restore(&candidate).await?;
                return Ok(None);
            }

            return Ok(Some(ClaimedMatch {
                candidate,
                matched_language,
            }));
        }

        Ok(None)
    }

    /// Read-only candidate scan: preference queues first (language order
    /// outer, queue order inner, mutual requirement), then the global
    /// queue. First qualifying candidate wins.
    pub async fn find_match(
        &self,
        requester: &QueuedUser,
    ) -> MatchResult<Option<(QueuedUser, Option<String>)>> {
        for lang in requester.preferences.normalized_languages() {
            let members = self.store.list_members(&keys::lang_queue(&lang)).await?;
            for member in &members {
                let Ok(candidate_id) = Uuid::parse_str(member) else {
                    continue;
                };
                if candidate_id == requester.user_id {
                    continue;
                }
                if self.is_blocked(requester.user_id, candidate_id).await? {
                    continue;
                }
                if self.recently_paired(requester.user_id, candidate_id).await? {
                    continue;
                }
                let Some(candidate) = self.queue.entry(candidate_id).await? else {
                    continue;
                };
                // Mutual requirement: the candidate must itself want this
                // language, not merely sit in a stale queue slot.
                if candidate.preferences.wants_language(&lang) {
                    return Ok(Some((candidate, Some(lang))));
                }
            }
        }

        let members = self.store.list_members(keys::GLOBAL_QUEUE).await?;
        for member in &members {
            let Ok(candidate_id) = Uuid::parse_str(member) else {
                continue;
            };
            if candidate_id == requester.user_id {
                continue;
            }
            if self.is_blocked(requester.user_id, candidate_id).await? {
                continue;
            }
            if self.recently_paired(requester.user_id, candidate_id).await? {
                continue;
            }
            let Some(candidate) = self.queue.entry(candidate_id).await? else {
                continue;
            };
            return Ok(Some((candidate, None)));
        }

        Ok(None)
    }

    /// Block check in either direction.
    async fn is_blocked(&self, a: Uuid, b: Uuid) -> MatchResult<bool> {
        if self
            .store
            .set_contains(&keys::blocks(a), &b.to_string())
            .await?
        {
            return Ok(true);
        }
        Ok(self
            .store
            .set_contains(&keys::blocks(b), &a.to_string())
            .await?)
    }

    async fn recently_paired(&self, a: Uuid, b: Uuid) -> MatchResult<bool> {
        Ok(self.store.get(&keys::recent_pair(a, b)).await?.is_some())
    }
}
