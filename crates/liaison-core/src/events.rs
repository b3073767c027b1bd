//! Workflow stream events.
//!
//! [`WorkflowEvent`] is the ordered unit of output a session produces; the
//! multiplexer wraps each one in an [`EventEnvelope`] carrying the session
//! id and a gapless, strictly increasing per-session sequence number.
//! Envelopes are what transports (SSE bindings, the history adapter)
//! consume; they are never persisted by the workflow core itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::TranslationRecord;
use crate::session::{Gap, Perspective, Stage};

/// Events emitted by a session's stage sequencer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Perspective classification committed.
    PerspectiveDetected {
        /// Detected role.
        perspective: Perspective,
    },

    /// One gap detected in the input. Emitted once per gap, after the
    /// gap-analysis stage commits.
    GapFound {
        /// The gap.
        gap: Gap,
    },

    /// Incremental translation output.
    Token {
        /// Text fragment.
        delta: String,
    },

    /// A stage committed its checkpoint. Always emitted after the
    /// corresponding checkpoint write.
    StageComplete {
        /// The committed stage.
        stage: Stage,
    },

    /// Session completed; carries the final record for history adapters.
    Done {
        /// The durable translation record.
        record: TranslationRecord,
    },

    /// Terminal error (or cancellation). `category` is a stable kind,
    /// never raw provider text.
    Error {
        /// Stable error category (e.g. `"provider"`, `"cancelled"`).
        category: String,
        /// Stable human-readable phrase.
        message: String,
    },
}

impl WorkflowEvent {
    /// Whether this event terminates the session's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// A [`WorkflowEvent`] stamped with session identity and ordering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Owning session.
    pub session_id: String,
    /// Gapless, strictly increasing sequence number scoped to the session.
    pub seq: u64,
    /// Emission time (UTC).
    pub timestamp: DateTime<Utc>,
    /// The event.
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

impl EventEnvelope {
    /// Stamp an event with identity, sequence, and the current time.
    pub fn new(session_id: impl Into<String>, seq: u64, event: WorkflowEvent) -> Self {
        Self {
            session_id: session_id.into(),
            seq,
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Direction;

    #[test]
    fn terminality() {
        assert!(
            WorkflowEvent::Error {
                category: "provider".into(),
                message: "provider failed".into()
            }
            .is_terminal()
        );
        assert!(!WorkflowEvent::Token { delta: "x".into() }.is_terminal());
        assert!(
            !WorkflowEvent::StageComplete {
                stage: Stage::Translating
            }
            .is_terminal()
        );
    }

    #[test]
    fn envelope_wire_format() {
        let env = EventEnvelope::new(
            "sess_1",
            3,
            WorkflowEvent::PerspectiveDetected {
                perspective: Perspective::Pm,
            },
        );
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["sessionId"], "sess_1");
        assert_eq!(v["seq"], 3);
        assert_eq!(v["type"], "perspective_detected");
        assert_eq!(v["perspective"], "pm");
    }

    #[test]
    fn done_envelope_round_trips() {
        let record = TranslationRecord {
            id: "tr_1".into(),
            original_content: "Add a login button".into(),
            translated_content: "Implement an auth entry point".into(),
            direction: Direction::PmToDev,
            perspective: Some(Perspective::Pm),
            gaps: vec![],
            suggestions: vec![],
            created_at: Utc::now(),
        };
        let env = EventEnvelope::new("sess_1", 9, WorkflowEvent::Done { record });
        let json = serde_json::to_string(&env).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }
}
