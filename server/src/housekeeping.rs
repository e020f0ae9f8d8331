//! Housekeeping Loops
//!
//! Background sweeps that keep the coordination state honest: queue
//! eviction, session timeouts, and periodic stats broadcasts. The
//! sweeps never initiate matches, they only clean up.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::history;
use crate::matchmaking::{
    CallSession, EndReason, MatchResult, QueueManager, QueuedUser, SessionService, SessionState,
};
use crate::store::MatchStore;
use crate::ws::directory::ConnectionDirectory;
use crate::ws::ServerEvent;

/// Point-in-time engine counters for the stats broadcast.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub active_sessions: u64,
    pub active_participants: u64,
    pub queue_depth: u64,
}

impl StatsSnapshot {
    pub fn into_event(self) -> ServerEvent {
        ServerEvent::StatsUpdate {
            active_sessions: self.active_sessions,
            active_participants: self.active_participants,
            queue_depth: self.queue_depth,
        }
    }
}

/// Read the current counters from the store.
pub async fn stats_snapshot<S: MatchStore>(
    queue: &QueueManager<S>,
    sessions: &SessionService<S>,
) -> MatchResult<StatsSnapshot> {
    let (active_sessions, active_participants) = sessions.counts().await?;
    let queue_depth = queue.depth().await?;
    Ok(StatsSnapshot {
        active_sessions,
        active_participants,
        queue_depth,
    })
}

/// One queue sweep pass: drop orphaned queue members whose entry record
/// expired, and evict anyone waiting longer than `max_wait_secs`.
/// Returns the evicted entries so the caller can notify them.
pub async fn sweep_queue_once<S: MatchStore>(
    queue: &QueueManager<S>,
    max_wait_secs: i64,
) -> MatchResult<Vec<QueuedUser>> {
    let mut evicted = Vec::new();

    for user_id in queue.global_members().await? {
        match queue.entry(user_id).await? {
            None => {
                // Entry record expired; the list member is stale.
                debug!(user_id = %user_id, "Dropping orphaned queue member");
                queue.drop_orphan(user_id).await?;
            }
            Some(entry) if entry.wait_secs() > max_wait_secs => {
                queue.dequeue(user_id).await?;
                evicted.push(entry);
            }
            Some(_) => {}
        }
    }

    // An expired entry record takes the language snapshot with it, so the
    // language queues are walked through the registry; nothing else can
    // ever remove these members.
    for lang in queue.known_languages().await? {
        for user_id in queue.language_members(&lang).await? {
            if queue.entry(user_id).await?.is_none() {
                debug!(user_id = %user_id, lang = %lang, "Dropping orphaned language-queue member");
                queue.drop_language_orphan(&lang, user_id).await?;
            }
        }
    }

    Ok(evicted)
}

/// One session sweep pass: drop orphaned active-set members, time out
/// handshakes stuck in `connecting`, and cap call duration. Returns the
/// ended sessions with their reasons so the caller can notify members.
pub async fn sweep_sessions_once<S: MatchStore>(
    sessions: &SessionService<S>,
    handshake_timeout_secs: i64,
    max_duration_secs: i64,
) -> MatchResult<Vec<(CallSession, EndReason)>> {
    let mut ended = Vec::new();

    for session_id in sessions.active_ids().await? {
        let Some(session) = sessions.get(session_id).await? else {
            debug!(session_id = %session_id, "Dropping orphaned active session");
            sessions.drop_orphan(session_id).await?;
            continue;
        };

        let reason = if session.state == SessionState::Connecting
            && session.age_secs() > handshake_timeout_secs
        {
            Some(EndReason::ConnectionTimeout)
        } else if session.age_secs() > max_duration_secs {
            Some(EndReason::MaxDuration)
        } else {
            None
        };

        if let Some(reason) = reason {
            if let Some(session) = sessions.end(session_id).await? {
                ended.push((session, reason));
            }
        }
    }

    Ok(ended)
}

/// Spawn all background loops for the lifetime of the process.
pub fn spawn_all(state: AppState) {
    spawn_queue_sweeper(state.clone());
    spawn_session_sweeper(state.clone());
    spawn_stats_broadcaster(state);
}

fn spawn_queue_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(state.config.queue_sweep_secs));
        loop {
            interval.tick().await;
            match sweep_queue_once(&state.queue, state.config.queue_max_wait_secs).await {
                Ok(evicted) => {
                    for entry in evicted {
                        info!(user_id = %entry.user_id, "Evicting user after queue timeout");
                        state.directory.deliver(
                            entry.user_id,
                            ServerEvent::Error {
                                code: "queue_timeout".to_string(),
                                message: "No partner found, please try again".to_string(),
                            },
                        );
                    }
                }
                Err(e) => warn!(error = %e, "Queue sweep failed"),
            }
        }
    });
}

fn spawn_session_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(state.config.session_sweep_secs));
        loop {
            interval.tick().await;
            let ended = match sweep_sessions_once(
                &state.sessions,
                state.config.handshake_timeout_secs,
                state.config.session_max_duration_secs,
            )
            .await
            {
                Ok(ended) => ended,
                Err(e) => {
                    warn!(error = %e, "Session sweep failed");
                    continue;
                }
            };

            for (session, reason) in ended {
                info!(session_id = %session.id, reason = reason.as_str(), "Session swept");
                for user_id in [session.user_a, session.user_b] {
                    state
                        .directory
                        .deliver(user_id, ServerEvent::CallEnded { reason });
                }
                let pool = state.db.clone();
                let duration = session.connected_secs();
                let session_id = session.id;
                history::fire("record_end", async move {
                    history::record_end(&pool, session_id, reason.as_str(), duration).await
                });
            }
        }
    });
}

fn spawn_stats_broadcaster(state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(state.config.stats_interval_secs));
        loop {
            interval.tick().await;
            // Skip the store round-trips when nobody is listening.
            if state.directory.stats_subscriber_count() == 0 {
                continue;
            }
            match stats_snapshot(&state.queue, &state.sessions).await {
                Ok(snapshot) => state.directory.broadcast_stats(&snapshot.into_event()),
                Err(e) => warn!(error = %e, "Stats snapshot failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::Preferences;
    use crate::store::memory::MemoryStore;
    use crate::store::{self, MatchStore};
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    fn queue(store: &MemoryStore) -> QueueManager<MemoryStore> {
        QueueManager::new(store.clone(), 300)
    }

    fn sessions(store: &MemoryStore) -> SessionService<MemoryStore> {
        SessionService::new(store.clone(), 3900, 60)
    }

    async fn enqueue_backdated(
        store: &MemoryStore,
        q: &QueueManager<MemoryStore>,
        secs_ago: i64,
    ) -> Uuid {
        let user_id = Uuid::new_v4();
        q.enqueue(user_id, Uuid::now_v7(), Preferences::default())
            .await
            .unwrap();
        // Rewrite the entry with a backdated timestamp.
        let mut entry = q.entry(user_id).await.unwrap().unwrap();
        entry.enqueued_at = Utc::now() - ChronoDuration::seconds(secs_ago);
        store
            .put(
                &store::keys::queue_entry(user_id),
                &serde_json::to_string(&entry).unwrap(),
                None,
            )
            .await
            .unwrap();
        user_id
    }

    #[tokio::test]
    async fn test_queue_sweep_evicts_expired_waiter() {
        let store = MemoryStore::new();
        let q = queue(&store);

        let fresh = enqueue_backdated(&store, &q, 5).await;
        let stale = enqueue_backdated(&store, &q, 120).await;

        let evicted = sweep_queue_once(&q, 60).await.unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].user_id, stale);

        assert!(q.is_queued(fresh).await.unwrap());
        assert!(!q.is_queued(stale).await.unwrap());
    }

    #[tokio::test]
    async fn test_queue_sweep_drops_orphans_silently() {
        let store = MemoryStore::new();
        let q = queue(&store);

        let user_id = Uuid::new_v4();
        q.enqueue(user_id, Uuid::now_v7(), Preferences::default())
            .await
            .unwrap();
        store.expire_now(&store::keys::queue_entry(user_id));

        let evicted = sweep_queue_once(&q, 60).await.unwrap();
        assert!(evicted.is_empty());
        assert_eq!(q.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_sweep_cleans_language_queue_orphans() {
        let store = MemoryStore::new();
        let q = queue(&store);

        let orphan = Uuid::new_v4();
        let waiting = Uuid::new_v4();
        let prefs = Preferences {
            preference_enabled: true,
            languages: vec!["es".to_string()],
        };
        q.enqueue(orphan, Uuid::now_v7(), prefs.clone()).await.unwrap();
        q.enqueue(waiting, Uuid::now_v7(), prefs).await.unwrap();
        store.expire_now(&store::keys::queue_entry(orphan));

        sweep_queue_once(&q, 60).await.unwrap();

        // The orphan leaves the language queue too, not just the global
        // list; the live waiter keeps their slot.
        assert_eq!(q.language_members("es").await.unwrap(), vec![waiting]);
        assert_eq!(q.global_members().await.unwrap(), vec![waiting]);
    }

    async fn create_backdated_session(
        store: &MemoryStore,
        svc: &SessionService<MemoryStore>,
        age_secs: i64,
        connect: bool,
    ) -> Uuid {
        let a = QueuedUser::new(Uuid::new_v4(), Uuid::now_v7(), Preferences::default());
        let b = QueuedUser::new(Uuid::new_v4(), Uuid::now_v7(), Preferences::default());
        let session = svc.create(&a, &b, None).await.unwrap();
        if connect {
            svc.mark_connected(session.id).await.unwrap();
        }
        let mut record = svc.get(session.id).await.unwrap().unwrap();
        record.started_at = Utc::now() - ChronoDuration::seconds(age_secs);
        store
            .put(
                &store::keys::session(session.id),
                &serde_json::to_string(&record).unwrap(),
                None,
            )
            .await
            .unwrap();
        session.id
    }

    #[tokio::test]
    async fn test_session_sweep_times_out_stuck_handshake() {
        let store = MemoryStore::new();
        let svc = sessions(&store);

        let stuck = create_backdated_session(&store, &svc, 30, false).await;
        let healthy = create_backdated_session(&store, &svc, 30, true).await;

        let ended = sweep_sessions_once(&svc, 15, 3600).await.unwrap();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].0.id, stuck);
        assert_eq!(ended[0].1, EndReason::ConnectionTimeout);

        assert!(svc.get(healthy).await.unwrap().is_some());
        assert!(svc.get(stuck).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_sweep_caps_duration() {
        let store = MemoryStore::new();
        let svc = sessions(&store);

        let marathon = create_backdated_session(&store, &svc, 4000, true).await;

        let ended = sweep_sessions_once(&svc, 15, 3600).await.unwrap();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].0.id, marathon);
        assert_eq!(ended[0].1, EndReason::MaxDuration);
    }

    #[tokio::test]
    async fn test_session_sweep_drops_orphaned_active_member() {
        let store = MemoryStore::new();
        let svc = sessions(&store);

        let a = QueuedUser::new(Uuid::new_v4(), Uuid::now_v7(), Preferences::default());
        let b = QueuedUser::new(Uuid::new_v4(), Uuid::now_v7(), Preferences::default());
        let session = svc.create(&a, &b, None).await.unwrap();
        store.expire_now(&store::keys::session(session.id));

        let ended = sweep_sessions_once(&svc, 15, 3600).await.unwrap();
        assert!(ended.is_empty());
        let (active, _) = svc.counts().await.unwrap();
        assert_eq!(active, 0);
    }

    #[tokio::test]
    async fn test_stats_snapshot_counts() {
        let store = MemoryStore::new();
        let q = queue(&store);
        let svc = sessions(&store);

        q.enqueue(Uuid::new_v4(), Uuid::now_v7(), Preferences::default())
            .await
            .unwrap();
        let a = QueuedUser::new(Uuid::new_v4(), Uuid::now_v7(), Preferences::default());
        let b = QueuedUser::new(Uuid::new_v4(), Uuid::now_v7(), Preferences::default());
        svc.create(&a, &b, None).await.unwrap();

        let snapshot = stats_snapshot(&q, &svc).await.unwrap();
        assert_eq!(snapshot.queue_depth, 1);
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(snapshot.active_participants, 2);
    }
}
