//! WebSocket Handler
//!
//! Real-time transport for the random-call engine: authenticates the
//! upgrade, maintains the Live Connection Directory entry, and dispatches
//! tagged client events into the queue, matching, session, and signaling
//! components.

pub mod directory;

use directory::ConnectionDirectory;

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::jwt;
use crate::db;
use crate::history;
use crate::housekeeping;
use crate::matchmaking::{EndReason, EnqueueOutcome, Preferences, QueuedUser};
use crate::signaling::{self, RelayOutcome, SdpPayload};
use crate::store::MatchStore;

/// WebSocket connection query params.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT access token for authentication
    pub token: String,
}

/// Client-to-server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Ping for keepalive
    Ping,
    /// Enter the random-call queue
    JoinQueue { preferences: Preferences },
    /// Leave the queue before a match is made
    CancelQueue,
    /// WebRTC offer for the current session
    Offer { session_id: Uuid, sdp: SdpPayload },
    /// WebRTC answer for the current session
    Answer { session_id: Uuid, sdp: SdpPayload },
    /// Trickle ICE candidate
    IceCandidate {
        session_id: Uuid,
        candidate: serde_json::Value,
    },
    /// Ephemeral in-call chat message
    ChatMessage { session_id: Uuid, text: String },
    /// End the call and immediately look for a new partner
    NextPartner { session_id: Uuid },
    /// End the call, optionally rating the partner 1-5
    EndCall {
        session_id: Uuid,
        rating: Option<i16>,
    },
    /// Report the partner for abuse; also blocks them
    ReportUser {
        session_id: Uuid,
        reason: String,
        details: Option<String>,
    },
    /// Start receiving periodic stats snapshots
    SubscribeStats,
    /// Stop receiving stats snapshots
    UnsubscribeStats,
}

/// Server-to-client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection authenticated successfully
    Ready { user_id: Uuid },
    /// Pong response
    Pong,
    /// Entered the queue at the given position
    Queued { position: u64 },
    /// A partner was found; the initiator creates the WebRTC offer
    MatchFound {
        session_id: Uuid,
        partner: PartnerInfo,
        is_initiator: bool,
        matched_language: Option<String>,
    },
    /// Forwarded WebRTC offer
    Offer { session_id: Uuid, sdp: SdpPayload },
    /// Forwarded WebRTC answer
    Answer { session_id: Uuid, sdp: SdpPayload },
    /// Forwarded ICE candidate
    IceCandidate {
        session_id: Uuid,
        candidate: serde_json::Value,
    },
    /// Forwarded chat message
    ChatMessage { session_id: Uuid, text: String },
    /// The session ended
    CallEnded { reason: EndReason },
    /// The partner is no longer reachable
    PartnerDisconnected,
    /// Periodic stats snapshot
    StatsUpdate {
        active_sessions: u64,
        active_participants: u64,
        queue_depth: u64,
    },
    /// Error
    Error { code: String, message: String },
}

impl ServerEvent {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Public partner info attached to a match notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerInfo {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl PartnerInfo {
    /// Enrich from the profile store, falling back to an anonymous label
    /// when the profile row is missing.
    async fn lookup(state: &AppState, user_id: Uuid) -> Self {
        match db::public_info(&state.db, user_id).await {
            Ok(Some(profile)) => Self {
                user_id: profile.id,
                display_name: profile.display_name,
                avatar_url: profile.avatar_url,
            },
            Ok(None) => Self::anonymous(user_id),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Profile lookup failed");
                Self::anonymous(user_id)
            }
        }
    }

    fn anonymous(user_id: Uuid) -> Self {
        Self {
            user_id,
            display_name: "Stranger".to_string(),
            avatar_url: None,
        }
    }
}

/// WebSocket upgrade handler.
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    // Validate token before upgrade
    let claims = match jwt::validate_access_token(&query.token, &state.config.jwt_public_key) {
        Ok(claims) => claims,
        Err(_) => {
            return Response::builder()
                .status(401)
                .body("Invalid token".into())
                .unwrap();
        }
    };

    let user_id = match Uuid::parse_str(&claims.sub) {
        Ok(id) => id,
        Err(_) => {
            return Response::builder()
                .status(401)
                .body("Invalid user ID in token".into())
                .unwrap();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Handle one WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connection_id = Uuid::now_v7();

    // Channel for sending events to this socket
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(100);
    state.directory.register(user_id, connection_id, tx.clone());

    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket connected");
    let _ = tx.send(ServerEvent::Ready { user_id }).await;

    // Forward events to the socket
    let sender_handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let msg = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = handle_client_message(&text, user_id, &state, &tx).await {
                    warn!(user_id = %user_id, error = %e, "Error handling message");
                    let _ = tx
                        .send(ServerEvent::error("internal_error", e.to_string()))
                        .await;
                }
            }
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "WebSocket closed");
                break;
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    sender_handle.abort();
    state.directory.unregister(user_id, connection_id);
    disconnect_cleanup(&state, user_id, connection_id).await;

    info!(user_id = %user_id, "WebSocket disconnected");
}

/// Transport-level disconnect is treated like an explicit end: leave the
/// queue or tear down the session with reason `disconnected`.
async fn disconnect_cleanup(state: &AppState, user_id: Uuid, connection_id: Uuid) {
    // A reconnect may already own the user; only clean up if this socket
    // was still their live connection.
    if state.directory.resolve(user_id).is_some() {
        debug!(user_id = %user_id, connection_id = %connection_id, "Reconnected elsewhere, skipping cleanup");
        return;
    }

    match state.sessions.get_for_user(user_id).await {
        Ok(Some(session)) => match state.sessions.end(session.id).await {
            Ok(Some(ended)) => {
                if let Some(partner) = ended.partner_of(user_id) {
                    state.directory.deliver(
                        partner,
                        ServerEvent::CallEnded {
                            reason: EndReason::Disconnected,
                        },
                    );
                }
                let pool = state.db.clone();
                let duration = ended.connected_secs();
                history::fire("record_end", async move {
                    history::record_end(&pool, ended.id, EndReason::Disconnected.as_str(), duration)
                        .await
                });
            }
            Ok(None) => {}
            Err(e) => warn!(user_id = %user_id, error = %e, "Disconnect session teardown failed"),
        },
        Ok(None) => {
            if let Err(e) = state.queue.dequeue(user_id).await {
                warn!(user_id = %user_id, error = %e, "Disconnect dequeue failed");
            }
        }
        Err(e) => warn!(user_id = %user_id, error = %e, "Disconnect lookup failed"),
    }
}

/// Dispatch one parsed client event.
async fn handle_client_message(
    text: &str,
    user_id: Uuid,
    state: &AppState,
    tx: &mpsc::Sender<ServerEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            let _ = tx
                .send(ServerEvent::error("invalid_event", e.to_string()))
                .await;
            return Ok(());
        }
    };

    match event {
        ClientEvent::Ping => {
            tx.send(ServerEvent::Pong).await?;
        }

        ClientEvent::JoinQueue { preferences } => {
            join_queue(state, user_id, preferences, tx).await?;
        }

        ClientEvent::CancelQueue => {
            state.queue.dequeue(user_id).await?;
            debug!(user_id = %user_id, "Left the queue");
        }

        ClientEvent::Offer { session_id, sdp } => {
            let outcome =
                signaling::relay_offer(&state.sessions, &*state.directory, user_id, session_id, sdp)
                    .await?;
            report_relay_outcome(state, outcome, tx).await;
        }

        ClientEvent::Answer { session_id, sdp } => {
            let outcome = signaling::relay_answer(
                &state.sessions,
                &*state.directory,
                user_id,
                session_id,
                sdp,
            )
            .await?;
            report_relay_outcome(state, outcome, tx).await;
        }

        ClientEvent::IceCandidate {
            session_id,
            candidate,
        } => {
            let outcome = signaling::relay_candidate(
                &state.sessions,
                &*state.directory,
                user_id,
                session_id,
                candidate,
            )
            .await?;
            report_relay_outcome(state, outcome, tx).await;
        }

        ClientEvent::ChatMessage { session_id, text } => {
            let outcome = signaling::relay_chat(
                &state.sessions,
                &*state.directory,
                user_id,
                session_id,
                &text,
                state.config.chat_max_len,
            )
            .await?;
            report_relay_outcome(state, outcome, tx).await;
        }

        ClientEvent::NextPartner { session_id } => {
            let ended = end_call(state, user_id, session_id, EndReason::NextClicked, tx).await?;
            // Re-enqueue with the preferences recorded at enqueue time.
            let preferences = ended
                .as_ref()
                .and_then(|s| s.preferences_of(user_id).cloned())
                .unwrap_or_default();
            join_queue(state, user_id, preferences, tx).await?;
        }

        ClientEvent::EndCall { session_id, rating } => {
            let ended = end_call(state, user_id, session_id, EndReason::UserEnded, tx).await?;
            if let (Some(session), Some(rating)) = (ended, rating) {
                if (1..=5).contains(&rating) {
                    let pool = state.db.clone();
                    history::fire("record_rating", async move {
                        history::record_rating(&pool, session.id, user_id, rating).await
                    });
                } else {
                    debug!(user_id = %user_id, rating, "Ignoring out-of-range rating");
                }
            }
        }

        ClientEvent::ReportUser {
            session_id,
            reason,
            details,
        } => {
            report_user(state, user_id, session_id, reason, details, tx).await?;
        }

        ClientEvent::SubscribeStats => {
            state.directory.subscribe_stats(user_id);
            let snapshot = housekeeping::stats_snapshot(&state.queue, &state.sessions).await?;
            tx.send(snapshot.into_event()).await?;
        }

        ClientEvent::UnsubscribeStats => {
            state.directory.unsubscribe_stats(user_id);
        }
    }

    Ok(())
}

/// Enqueue a user and immediately attempt a match.
async fn join_queue(
    state: &AppState,
    user_id: Uuid,
    preferences: Preferences,
    tx: &mpsc::Sender<ServerEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let connection_id = state.directory.resolve(user_id).unwrap_or_else(Uuid::now_v7);
    let (outcome, entry) = state
        .queue
        .enqueue(user_id, connection_id, preferences)
        .await?;

    match outcome {
        EnqueueOutcome::AlreadyQueued => {
            tx.send(ServerEvent::error("already_queued", "Already waiting in the queue"))
                .await?;
        }
        EnqueueOutcome::AlreadyInSession => {
            tx.send(ServerEvent::error("already_in_session", "Already in a call"))
                .await?;
        }
        EnqueueOutcome::Queued { position } => {
            tx.send(ServerEvent::Queued { position }).await?;
            if let Some(entry) = entry {
                attempt_match(state, &entry, tx).await?;
            }
        }
    }
    Ok(())
}

/// Try to pair the freshly queued requester. Matching is event-driven:
/// this is the only place a match is initiated; housekeeping never
/// matches, it only cleans up.
async fn attempt_match(
    state: &AppState,
    requester: &QueuedUser,
    tx: &mpsc::Sender<ServerEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let Some(matched) = state.engine.try_match(requester).await? else {
            // No partner right now; the user stays queued and a later
            // enqueue (or their own) will pair them.
            return Ok(());
        };

        let session = state
            .sessions
            .create(requester, &matched.candidate, matched.matched_language.clone())
            .await?;

        let requester_info = PartnerInfo::lookup(state, requester.user_id).await;
        let candidate_delivered = state.directory.deliver(
            matched.candidate.user_id,
            ServerEvent::MatchFound {
                session_id: session.id,
                partner: requester_info,
                is_initiator: false,
                matched_language: session.matched_language.clone(),
            },
        );

        if !candidate_delivered {
            // The winner of the claim is responsible for undoing it when
            // the candidate's connection died between enqueue and now.
            warn!(candidate = %matched.candidate.user_id, "Matched candidate unreachable, retrying");
            state.sessions.end(session.id).await?;
            state.queue.restore(requester).await?;
            continue;
        }

        let candidate_info = PartnerInfo::lookup(state, matched.candidate.user_id).await;
        tx.send(ServerEvent::MatchFound {
            session_id: session.id,
            partner: candidate_info,
            is_initiator: true,
            matched_language: session.matched_language.clone(),
        })
        .await?;

        info!(
            session_id = %session.id,
            user_a = %session.user_a,
            user_b = %session.user_b,
            matched_language = ?session.matched_language,
            "Match created"
        );

        let pool = state.db.clone();
        let started = session.clone();
        history::fire("record_start", async move {
            history::record_start(&pool, &started).await
        });
        return Ok(());
    }
}

/// Map a relay outcome back to the sender.
async fn report_relay_outcome(
    state: &AppState,
    outcome: RelayOutcome,
    tx: &mpsc::Sender<ServerEvent>,
) {
    match outcome {
        RelayOutcome::Delivered => {}
        RelayOutcome::Connected(session) => {
            let pool = state.db.clone();
            history::fire("record_connected", async move {
                history::record_connected(&pool, session.id).await
            });
        }
        RelayOutcome::PartnerUnreachable => {
            let _ = tx.send(ServerEvent::PartnerDisconnected).await;
        }
        RelayOutcome::Rejected(reason) => {
            let _ = tx.send(ServerEvent::error("invalid_payload", reason)).await;
        }
    }
}

/// Shared teardown for explicit end / next-partner: membership check,
/// idempotent end, partner notification, history recording.
async fn end_call(
    state: &AppState,
    user_id: Uuid,
    session_id: Uuid,
    reason: EndReason,
    tx: &mpsc::Sender<ServerEvent>,
) -> Result<Option<crate::matchmaking::CallSession>, Box<dyn std::error::Error + Send + Sync>> {
    let Some(session) = state.sessions.get(session_id).await? else {
        // Already torn down by the partner or housekeeping.
        return Ok(None);
    };
    if !session.is_member(user_id) {
        tx.send(ServerEvent::error("not_member", "Not a member of this session"))
            .await?;
        return Ok(None);
    }

    let Some(ended) = state.sessions.end(session_id).await? else {
        return Ok(None);
    };

    if let Some(partner) = ended.partner_of(user_id) {
        state
            .directory
            .deliver(partner, ServerEvent::CallEnded { reason });
    }

    let pool = state.db.clone();
    let duration = ended.connected_secs();
    let ended_id = ended.id;
    history::fire("record_end", async move {
        history::record_end(&pool, ended_id, reason.as_str(), duration).await
    });

    Ok(Some(ended))
}

/// Persist an abuse report and block the reported partner for the
/// reporter so they can never be matched again.
async fn report_user(
    state: &AppState,
    user_id: Uuid,
    session_id: Uuid,
    reason: String,
    details: Option<String>,
    tx: &mpsc::Sender<ServerEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let Some(session) = state.sessions.get(session_id).await? else {
        tx.send(ServerEvent::error("session_not_found", "Session no longer exists"))
            .await?;
        return Ok(());
    };
    let Some(reported) = session.partner_of(user_id) else {
        tx.send(ServerEvent::error("not_member", "Not a member of this session"))
            .await?;
        return Ok(());
    };

    state
        .store
        .add_to_set(&crate::store::keys::blocks(user_id), &reported.to_string())
        .await?;

    let pool = state.db.clone();
    history::fire("record_report", async move {
        history::record_report(&pool, session_id, user_id, reported, &reason, details.as_deref())
            .await
    });

    info!(reporter = %user_id, reported = %reported, session_id = %session_id, "User reported");
    Ok(())
}
