//! Matchmaking data model: queue entries, preferences, and call sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Matching preferences supplied at enqueue time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preferences {
    /// Whether language preferences participate in matching at all.
    pub preference_enabled: bool,
    /// Requested languages, in the user's priority order.
    #[serde(default)]
    pub languages: Vec<String>,
}

impl Preferences {
    /// Disabled preferences (global matching only).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            preference_enabled: false,
            languages: Vec::new(),
        }
    }

    /// Requested languages, case-normalized and de-duplicated, preserving
    /// the user's priority order. Empty when preferences are disabled.
    #[must_use]
    pub fn normalized_languages(&self) -> Vec<String> {
        if !self.preference_enabled {
            return Vec::new();
        }
        let mut seen = Vec::new();
        for lang in &self.languages {
            let normalized = lang.trim().to_lowercase();
            if !normalized.is_empty() && !seen.contains(&normalized) {
                seen.push(normalized);
            }
        }
        seen
    }

    /// Whether this user requested `lang` (already normalized) with
    /// preferences enabled. Mutual matching requires this on both sides.
    #[must_use]
    pub fn wants_language(&self, lang: &str) -> bool {
        self.preference_enabled
            && self
                .languages
                .iter()
                .any(|l| l.trim().eq_ignore_ascii_case(lang))
    }
}

/// A waiting user's record of intent to be matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedUser {
    pub user_id: Uuid,
    pub preferences: Preferences,
    pub enqueued_at: DateTime<Utc>,
    /// Live connection at enqueue time; delivery always re-resolves the
    /// current connection, this is informational.
    pub connection_id: Uuid,
}

impl QueuedUser {
    #[must_use]
    pub fn new(user_id: Uuid, connection_id: Uuid, preferences: Preferences) -> Self {
        Self {
            user_id,
            preferences,
            enqueued_at: Utc::now(),
            connection_id,
        }
    }

    /// Seconds this entry has been waiting.
    #[must_use]
    pub fn wait_secs(&self) -> i64 {
        Utc::now().signed_duration_since(self.enqueued_at).num_seconds()
    }
}

/// Session lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Connected,
    Ended,
}

/// Reason a session ended, forwarded to peers and the history recorder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserEnded,
    NextClicked,
    Disconnected,
    ConnectionTimeout,
    MaxDuration,
}

impl EndReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserEnded => "user_ended",
            Self::NextClicked => "next_clicked",
            Self::Disconnected => "disconnected",
            Self::ConnectionTimeout => "connection_timeout",
            Self::MaxDuration => "max_duration",
        }
    }
}

/// An active pairing between exactly two users.
///
/// The record exists iff both members' `user_session` index entries point
/// at it; it is deleted on end, leaving only the recently-paired marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub connection_a: Uuid,
    pub connection_b: Uuid,
    /// Language that caused the pairing, if the preference path matched.
    pub matched_language: Option<String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Enqueue-time preference snapshots, kept so "next partner" can
    /// re-enqueue with identical preferences.
    pub preferences_a: Preferences,
    pub preferences_b: Preferences,
}

impl CallSession {
    #[must_use]
    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// The other member, or `None` if `user_id` is not a member.
    #[must_use]
    pub fn partner_of(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.user_a {
            Some(self.user_b)
        } else if user_id == self.user_b {
            Some(self.user_a)
        } else {
            None
        }
    }

    /// The preference snapshot recorded for a member at enqueue time.
    #[must_use]
    pub fn preferences_of(&self, user_id: Uuid) -> Option<&Preferences> {
        if user_id == self.user_a {
            Some(&self.preferences_a)
        } else if user_id == self.user_b {
            Some(&self.preferences_b)
        } else {
            None
        }
    }

    /// Total session age in seconds.
    #[must_use]
    pub fn age_secs(&self) -> i64 {
        Utc::now().signed_duration_since(self.started_at).num_seconds()
    }

    /// Seconds of the call spent connected, zero if the handshake never
    /// completed.
    #[must_use]
    pub fn connected_secs(&self) -> i64 {
        self.connected_at
            .map_or(0, |at| Utc::now().signed_duration_since(at).num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_languages_order_and_dedup() {
        let prefs = Preferences {
            preference_enabled: true,
            languages: vec![
                " ES ".to_string(),
                "fr".to_string(),
                "es".to_string(),
                String::new(),
            ],
        };
        assert_eq!(prefs.normalized_languages(), vec!["es", "fr"]);
    }

    #[test]
    fn test_disabled_preferences_have_no_languages() {
        let prefs = Preferences {
            preference_enabled: false,
            languages: vec!["es".to_string()],
        };
        assert!(prefs.normalized_languages().is_empty());
        assert!(!prefs.wants_language("es"));
    }

    #[test]
    fn test_wants_language_is_case_insensitive() {
        let prefs = Preferences {
            preference_enabled: true,
            languages: vec!["Es".to_string()],
        };
        assert!(prefs.wants_language("es"));
        assert!(!prefs.wants_language("fr"));
    }

    #[test]
    fn test_partner_of() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let session = CallSession {
            id: Uuid::new_v4(),
            user_a: a,
            user_b: b,
            connection_a: Uuid::new_v4(),
            connection_b: Uuid::new_v4(),
            matched_language: None,
            state: SessionState::Connecting,
            started_at: Utc::now(),
            connected_at: None,
            preferences_a: Preferences::disabled(),
            preferences_b: Preferences::disabled(),
        };

        assert_eq!(session.partner_of(a), Some(b));
        assert_eq!(session.partner_of(b), Some(a));
        assert_eq!(session.partner_of(Uuid::new_v4()), None);
    }

    #[test]
    fn test_end_reason_serialization() {
        assert_eq!(
            serde_json::to_string(&EndReason::ConnectionTimeout).unwrap(),
            "\"connection_timeout\""
        );
        assert_eq!(EndReason::NextClicked.as_str(), "next_clicked");
    }

    #[test]
    fn test_session_state_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionState::Connecting).unwrap(),
            "\"connecting\""
        );
        assert_eq!(
            serde_json::from_str::<SessionState>("\"connected\"").unwrap(),
            SessionState::Connected
        );
    }
}
