//! API Router and Application State
//!
//! Central routing configuration and shared state.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};

use crate::config::Config;
use crate::matchmaking::{MatchEngine, QueueManager, SessionService};
use crate::store::RedisStore;
use crate::ws;
use crate::ws::directory::WsDirectory;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,
    /// Coordination store (Redis)
    pub store: RedisStore,
    /// Server configuration
    pub config: Arc<Config>,
    /// Live connection directory
    pub directory: Arc<WsDirectory>,
    /// Waiting queue
    pub queue: QueueManager<RedisStore>,
    /// Matching engine
    pub engine: MatchEngine<RedisStore>,
    /// Session lifecycle
    pub sessions: SessionService<RedisStore>,
}

impl AppState {
    /// Create new application state, wiring the engine components to the
    /// same store.
    #[must_use]
    pub fn new(db: PgPool, store: RedisStore, config: Config) -> Self {
        let queue = QueueManager::new(store.clone(), config.queue_entry_ttl_secs());
        let engine = MatchEngine::new(store.clone(), queue.clone());
        let sessions = SessionService::new(
            store.clone(),
            config.session_ttl_secs(),
            config.recent_pair_ttl_secs,
        );
        Self {
            db,
            store,
            config: Arc::new(config),
            directory: Arc::new(WsDirectory::new()),
            queue,
            engine,
            sessions,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // WebSocket
        .route("/ws", get(ws::handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Postgres reachable
    database: bool,
    /// Coordination store reachable
    store: bool,
    /// Live WebSocket connections on this node
    connections: usize,
}

/// Health check endpoint. Probes both backends so a load balancer can
/// drain a node that lost Postgres or Redis.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    use crate::store::MatchStore;

    let database = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let store = state.store.get("rc:health").await.is_ok();
    Json(HealthResponse {
        status: health_status(database, store),
        database,
        store,
        connections: state.directory.connection_count(),
    })
}

const fn health_status(database: bool, store: bool) -> &'static str {
    if database && store {
        "ok"
    } else {
        "degraded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status() {
        assert_eq!(health_status(true, true), "ok");
        assert_eq!(health_status(false, true), "degraded");
        assert_eq!(health_status(true, false), "degraded");
    }

    #[test]
    fn test_health_response_shape() {
        let json = serde_json::to_string(&HealthResponse {
            status: "ok",
            database: true,
            store: true,
            connections: 3,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"status":"ok","database":true,"store":true,"connections":3}"#
        );
    }
}
