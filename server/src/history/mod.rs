//! Call History Recorder
//!
//! Asynchronous persistence of call lifecycle events, ratings, and abuse
//! reports. History writes are best-effort: the live call path never
//! waits on Postgres, failures are logged and dropped.

use std::future::Future;

use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::matchmaking::CallSession;

/// Spawn a history write off the hot path, logging any failure.
pub fn fire<F>(label: &'static str, fut: F)
where
    F: Future<Output = Result<(), sqlx::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            warn!(write = label, error = %e, "History write failed");
        }
    });
}

/// Record a freshly created session.
pub async fn record_start(pool: &PgPool, session: &CallSession) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO call_history (session_id, user_a, user_b, matched_language, started_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (session_id) DO NOTHING",
    )
    .bind(session.id)
    .bind(session.user_a)
    .bind(session.user_b)
    .bind(session.matched_language.as_deref())
    .bind(session.started_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the moment the media handshake completed.
pub async fn record_connected(pool: &PgPool, session_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE call_history SET connected_at = NOW()
         WHERE session_id = $1 AND connected_at IS NULL",
    )
    .bind(session_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the end of a session. Duration is connected time, zero when
/// the handshake never completed.
pub async fn record_end(
    pool: &PgPool,
    session_id: Uuid,
    reason: &str,
    duration_secs: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE call_history
         SET ended_at = NOW(), end_reason = $2, duration_seconds = $3
         WHERE session_id = $1 AND ended_at IS NULL",
    )
    .bind(session_id)
    .bind(reason)
    .bind(duration_secs)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a 1-5 partner rating. One rating per rater per session.
pub async fn record_rating(
    pool: &PgPool,
    session_id: Uuid,
    rater_id: Uuid,
    rating: i16,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO call_ratings (session_id, rater_id, rating)
         VALUES ($1, $2, $3)
         ON CONFLICT (session_id, rater_id) DO UPDATE SET rating = EXCLUDED.rating",
    )
    .bind(session_id)
    .bind(rater_id)
    .bind(rating)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record an abuse report.
pub async fn record_report(
    pool: &PgPool,
    session_id: Uuid,
    reporter_id: Uuid,
    reported_id: Uuid,
    reason: &str,
    details: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO call_reports (session_id, reporter_id, reported_id, reason, details)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(session_id)
    .bind(reporter_id)
    .bind(reported_id)
    .bind(reason)
    .bind(details)
    .execute(pool)
    .await?;
    Ok(())
}
