//! Signaling Relay
//!
//! Validates and forwards WebRTC handshake payloads and ephemeral chat
//! between the two members of a session. Holds no state of its own; the
//! partner's identity and live connection are resolved at call time so a
//! reconnected partner is still reachable.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::matchmaking::{CallSession, MatchResult, SessionService};
use crate::store::MatchStore;
use crate::ws::directory::ConnectionDirectory;
use crate::ws::ServerEvent;

/// An SDP handshake payload as received from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpPayload {
    /// Explicit type tag; must match the operation ("offer" / "answer").
    #[serde(rename = "type")]
    pub kind: String,
    /// SDP body; must be non-empty.
    pub sdp: String,
}

impl SdpPayload {
    /// Shape validation: explicit matching type tag and a non-empty body.
    pub fn validate(&self, expected_kind: &str) -> Result<(), &'static str> {
        if self.kind != expected_kind {
            return Err("mismatched payload type tag");
        }
        if self.sdp.trim().is_empty() {
            return Err("empty SDP body");
        }
        Ok(())
    }
}

/// Outcome of a relay attempt, mapped to client-facing events by the
/// transport layer.
#[derive(Debug)]
pub enum RelayOutcome {
    /// Forwarded to the partner's live connection.
    Delivered,
    /// Forwarded, and the session advanced to `connected`.
    Connected(CallSession),
    /// Session gone or partner has no live connection; caller should be
    /// told the partner disconnected rather than left hanging.
    PartnerUnreachable,
    /// Payload failed shape validation.
    Rejected(&'static str),
}

/// Trim and cap a chat message. Returns `None` when nothing relayable
/// remains. Truncation is character-based, never mid-codepoint.
#[must_use]
pub fn sanitize_chat(text: &str, max_len: usize) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(max_len).collect())
}

/// Forward an SDP offer to the sender's partner.
pub async fn relay_offer<S: MatchStore>(
    sessions: &SessionService<S>,
    directory: &dyn ConnectionDirectory,
    sender: Uuid,
    session_id: Uuid,
    sdp: SdpPayload,
) -> MatchResult<RelayOutcome> {
    if let Err(reason) = sdp.validate("offer") {
        return Ok(RelayOutcome::Rejected(reason));
    }
    forward(sessions, directory, sender, session_id, |sid| {
        ServerEvent::Offer {
            session_id: sid,
            sdp,
        }
    })
    .await
}

/// Forward an SDP answer; successful delivery is the single point where a
/// session advances past `connecting`.
pub async fn relay_answer<S: MatchStore>(
    sessions: &SessionService<S>,
    directory: &dyn ConnectionDirectory,
    sender: Uuid,
    session_id: Uuid,
    sdp: SdpPayload,
) -> MatchResult<RelayOutcome> {
    if let Err(reason) = sdp.validate("answer") {
        return Ok(RelayOutcome::Rejected(reason));
    }
    let outcome = forward(sessions, directory, sender, session_id, |sid| {
        ServerEvent::Answer {
            session_id: sid,
            sdp,
        }
    })
    .await?;

    match outcome {
        RelayOutcome::Delivered => {
            match sessions.mark_connected(session_id).await? {
                Some(session) => Ok(RelayOutcome::Connected(session)),
                // Ended between forward and transition; benign race.
                None => Ok(RelayOutcome::PartnerUnreachable),
            }
        }
        other => Ok(other),
    }
}

/// Forward an ICE candidate without semantic validation.
pub async fn relay_candidate<S: MatchStore>(
    sessions: &SessionService<S>,
    directory: &dyn ConnectionDirectory,
    sender: Uuid,
    session_id: Uuid,
    candidate: serde_json::Value,
) -> MatchResult<RelayOutcome> {
    if candidate.is_null() {
        return Ok(RelayOutcome::Rejected("missing candidate"));
    }
    forward(sessions, directory, sender, session_id, |sid| {
        ServerEvent::IceCandidate {
            session_id: sid,
            candidate,
        }
    })
    .await
}

/// Forward an ephemeral chat message (trimmed, capped, never persisted).
pub async fn relay_chat<S: MatchStore>(
    sessions: &SessionService<S>,
    directory: &dyn ConnectionDirectory,
    sender: Uuid,
    session_id: Uuid,
    text: &str,
    max_len: usize,
) -> MatchResult<RelayOutcome> {
    let Some(text) = sanitize_chat(text, max_len) else {
        return Ok(RelayOutcome::Rejected("empty message"));
    };
    forward(sessions, directory, sender, session_id, |sid| {
        ServerEvent::ChatMessage {
            session_id: sid,
            text,
        }
    })
    .await
}

/// Resolve the sender's partner for the session and deliver the event to
/// their current live connection.
async fn forward<S, F>(
    sessions: &SessionService<S>,
    directory: &dyn ConnectionDirectory,
    sender: Uuid,
    session_id: Uuid,
    make_event: F,
) -> MatchResult<RelayOutcome>
where
    S: MatchStore,
    F: FnOnce(Uuid) -> ServerEvent,
{
    let Some(session) = sessions.get(session_id).await? else {
        debug!(session_id = %session_id, "Relay for missing session");
        return Ok(RelayOutcome::PartnerUnreachable);
    };
    let Some(partner) = session.partner_of(sender) else {
        return Ok(RelayOutcome::Rejected("not a session member"));
    };

    if directory.deliver(partner, make_event(session_id)) {
        Ok(RelayOutcome::Delivered)
    } else {
        debug!(session_id = %session_id, partner = %partner, "Partner has no live connection");
        Ok(RelayOutcome::PartnerUnreachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::{Preferences, QueuedUser, SessionState};
    use crate::store::memory::MemoryStore;
    use dashmap::DashMap;
    use std::sync::Mutex;

    /// Directory stub that records everything delivered.
    #[derive(Default)]
    struct RecordingDirectory {
        online: DashMap<Uuid, Uuid>,
        delivered: Mutex<Vec<(Uuid, ServerEvent)>>,
    }

    impl RecordingDirectory {
        fn connect(&self, user: Uuid) {
            self.online.insert(user, Uuid::new_v4());
        }

        fn take(&self) -> Vec<(Uuid, ServerEvent)> {
            std::mem::take(&mut self.delivered.lock().unwrap())
        }
    }

    impl ConnectionDirectory for RecordingDirectory {
        fn resolve(&self, user_id: Uuid) -> Option<Uuid> {
            self.online.get(&user_id).map(|c| *c)
        }

        fn deliver(&self, user_id: Uuid, event: ServerEvent) -> bool {
            if !self.online.contains_key(&user_id) {
                return false;
            }
            self.delivered.lock().unwrap().push((user_id, event));
            true
        }
    }

    fn offer(sdp: &str) -> SdpPayload {
        SdpPayload {
            kind: "offer".to_string(),
            sdp: sdp.to_string(),
        }
    }

    async fn fixture() -> (
        SessionService<MemoryStore>,
        RecordingDirectory,
        Uuid,
        Uuid,
        Uuid,
    ) {
        let sessions = SessionService::new(MemoryStore::new(), 3900, 60);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let session = sessions
            .create(
                &QueuedUser::new(a, Uuid::new_v4(), Preferences::disabled()),
                &QueuedUser::new(b, Uuid::new_v4(), Preferences::disabled()),
                None,
            )
            .await
            .unwrap();
        let directory = RecordingDirectory::default();
        directory.connect(a);
        directory.connect(b);
        (sessions, directory, session.id, a, b)
    }

    #[test]
    fn test_sdp_validation() {
        assert!(offer("v=0").validate("offer").is_ok());
        assert!(offer("   ").validate("offer").is_err());
        assert!(offer("v=0").validate("answer").is_err());
    }

    #[test]
    fn test_sanitize_chat_trims_and_caps() {
        assert_eq!(sanitize_chat("  hi  ", 500).as_deref(), Some("hi"));
        assert_eq!(sanitize_chat("   ", 500), None);
        assert_eq!(sanitize_chat("héllo", 3).as_deref(), Some("hél"));
    }

    #[tokio::test]
    async fn test_offer_forwarded_to_partner() {
        let (sessions, directory, session_id, a, b) = fixture().await;

        let outcome = relay_offer(&sessions, &directory, a, session_id, offer("v=0"))
            .await
            .unwrap();
        assert!(matches!(outcome, RelayOutcome::Delivered));

        let delivered = directory.take();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, b);
        assert!(matches!(delivered[0].1, ServerEvent::Offer { .. }));
    }

    #[tokio::test]
    async fn test_invalid_offer_rejected_without_forwarding() {
        let (sessions, directory, session_id, a, _) = fixture().await;

        let payload = SdpPayload {
            kind: "answer".to_string(),
            sdp: "v=0".to_string(),
        };
        let outcome = relay_offer(&sessions, &directory, a, session_id, payload)
            .await
            .unwrap();
        assert!(matches!(outcome, RelayOutcome::Rejected(_)));
        assert!(directory.take().is_empty());
    }

    #[tokio::test]
    async fn test_answer_marks_session_connected() {
        let (sessions, directory, session_id, _, b) = fixture().await;

        let payload = SdpPayload {
            kind: "answer".to_string(),
            sdp: "v=0".to_string(),
        };
        let outcome = relay_answer(&sessions, &directory, b, session_id, payload)
            .await
            .unwrap();

        match outcome {
            RelayOutcome::Connected(session) => {
                assert_eq!(session.state, SessionState::Connected);
            }
            other => panic!("expected Connected, got {other:?}"),
        }
        let stored = sessions.get(session_id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Connected);
    }

    #[tokio::test]
    async fn test_relay_to_offline_partner_reports_unreachable() {
        let (sessions, directory, session_id, a, b) = fixture().await;
        directory.online.remove(&b);

        let outcome = relay_offer(&sessions, &directory, a, session_id, offer("v=0"))
            .await
            .unwrap();
        assert!(matches!(outcome, RelayOutcome::PartnerUnreachable));
    }

    #[tokio::test]
    async fn test_relay_for_ended_session_is_benign() {
        let (sessions, directory, session_id, a, _) = fixture().await;
        sessions.end(session_id).await.unwrap();

        let outcome = relay_offer(&sessions, &directory, a, session_id, offer("v=0"))
            .await
            .unwrap();
        assert!(matches!(outcome, RelayOutcome::PartnerUnreachable));
    }

    #[tokio::test]
    async fn test_non_member_rejected() {
        let (sessions, directory, session_id, _, _) = fixture().await;
        let outsider = Uuid::new_v4();
        directory.connect(outsider);

        let outcome = relay_offer(&sessions, &directory, outsider, session_id, offer("v=0"))
            .await
            .unwrap();
        assert!(matches!(outcome, RelayOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn test_chat_truncated_before_relay() {
        let (sessions, directory, session_id, a, _) = fixture().await;

        let long = "x".repeat(600);
        relay_chat(&sessions, &directory, a, session_id, &long, 500)
            .await
            .unwrap();

        let delivered = directory.take();
        match &delivered[0].1 {
            ServerEvent::ChatMessage { text, .. } => assert_eq!(text.len(), 500),
            other => panic!("expected ChatMessage, got {other:?}"),
        }
    }
}
