//! The durable translation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{Checkpoint, Direction, Gap, Perspective};

/// Immutable artifact produced when a session reaches `Completed`.
///
/// Owned by the history store after creation; the workflow core never
/// mutates it again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRecord {
    /// Record id (`tr_`-prefixed).
    pub id: String,
    /// The input text as submitted.
    pub original_content: String,
    /// The final translated content.
    pub translated_content: String,
    /// Requested direction.
    pub direction: Direction,
    /// Perspective detected during the workflow.
    pub perspective: Option<Perspective>,
    /// Gaps detected during the workflow.
    pub gaps: Vec<Gap>,
    /// Improvement suggestions from gap analysis.
    pub suggestions: Vec<String>,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
}

impl TranslationRecord {
    /// Derive a record from a completed session's checkpoint.
    pub fn from_checkpoint(id: impl Into<String>, checkpoint: &Checkpoint) -> Self {
        Self {
            id: id.into(),
            original_content: checkpoint.content.clone(),
            translated_content: checkpoint.partial_output.clone(),
            direction: checkpoint.direction,
            perspective: checkpoint.perspective,
            gaps: checkpoint.gaps.clone(),
            suggestions: checkpoint.suggestions.clone(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionStatus, Stage};

    #[test]
    fn record_derives_from_completed_checkpoint() {
        let mut cp = Checkpoint::new("Add a login button", Direction::PmToDev, None, "auto");
        cp.stage = Stage::Translating;
        cp.status = SessionStatus::Completed;
        cp.perspective = Some(Perspective::Pm);
        cp.partial_output = "Implement an auth entry point".into();
        cp.gaps.push(Gap {
            category: "constraints".into(),
            description: "No auth provider named".into(),
        });

        let record = TranslationRecord::from_checkpoint("tr_x", &cp);
        assert_eq!(record.id, "tr_x");
        assert_eq!(record.original_content, "Add a login button");
        assert_eq!(record.translated_content, "Implement an auth entry point");
        assert_eq!(record.direction, Direction::PmToDev);
        assert_eq!(record.gaps.len(), 1);
    }
}
