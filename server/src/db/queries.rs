use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// The subset of a user row safe to show to a matched stranger.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PublicProfile {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Get the public profile attached to a match notification.
pub async fn public_info(pool: &PgPool, user_id: Uuid) -> Result<Option<PublicProfile>, sqlx::Error> {
    sqlx::query_as::<_, PublicProfile>(
        "SELECT id, display_name, avatar_url FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}
