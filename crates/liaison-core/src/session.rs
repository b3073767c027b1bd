//! Session model: stages, statuses, directions, gaps, and checkpoints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new opaque session id (`sess_` + UUIDv7).
pub fn new_session_id() -> String {
    format!("sess_{}", Uuid::now_v7().simple())
}

/// Generate a new translation record id (`tr_` + UUIDv7).
pub fn new_record_id() -> String {
    format!("tr_{}", Uuid::now_v7().simple())
}

/// Translation direction, always chosen by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Product language into engineering language.
    PmToDev,
    /// Engineering language into product language.
    DevToPm,
}

impl Direction {
    /// Wire string used in requests, events, and history rows.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PmToDev => "pm_to_dev",
            Self::DevToPm => "dev_to_pm",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = InvalidDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pm_to_dev" => Ok(Self::PmToDev),
            "dev_to_pm" => Ok(Self::DevToPm),
            other => Err(InvalidDirection(other.to_owned())),
        }
    }
}

/// Error returned when a direction string is not a supported value.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid direction: {0:?} (expected pm_to_dev or dev_to_pm)")]
pub struct InvalidDirection(pub String);

/// Workplace role detected in the input text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    /// Product-management voice.
    Pm,
    /// Engineering voice.
    Dev,
}

impl Perspective {
    /// Wire string for event payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pm => "pm",
            Self::Dev => "dev",
        }
    }
}

impl fmt::Display for Perspective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An information gap detected in the input text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Gap category (e.g. `"acceptance_criteria"`, `"constraints"`).
    pub category: String,
    /// Human-readable description of what is missing.
    pub description: String,
}

/// Ordered workflow stages.
///
/// A checkpoint records the **last committed** stage; a resumed execution
/// starts at the stage after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Session created, no stage committed yet.
    Idle,
    /// Perspective classification committed.
    DetectingPerspective,
    /// Gap analysis committed.
    AnalyzingGaps,
    /// Token stream completed and committed.
    Translating,
}

impl Stage {
    /// The stage that executes after this committed stage, or `None` once
    /// `Translating` has committed.
    pub fn next(self) -> Option<Stage> {
        match self {
            Self::Idle => Some(Self::DetectingPerspective),
            Self::DetectingPerspective => Some(Self::AnalyzingGaps),
            Self::AnalyzingGaps => Some(Self::Translating),
            Self::Translating => None,
        }
    }

    /// Wire string for event payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DetectingPerspective => "detecting_perspective",
            Self::AnalyzingGaps => "analyzing_gaps",
            Self::Translating => "translating",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle status. Transitions are monotonic: a terminal status
/// is never left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Workflow in progress (or resumable).
    Active,
    /// All stages committed; a record exists.
    Completed,
    /// Terminal failure; `failure_reason` is set.
    Failed,
    /// Cancelled by the caller; partial output discarded.
    Cancelled,
}

impl SessionStatus {
    /// Whether no further stage transitions may occur.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Wire string for persistence and events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Versioned snapshot of a session's committed progress.
///
/// The checkpoint store treats this as an opaque blob; versioning lives
/// beside it. Each stage consumes only the fields prior stages committed
/// and never re-derives them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Last committed stage.
    pub stage: Stage,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Requested translation direction.
    pub direction: Direction,
    /// Original input text.
    pub content: String,
    /// Optional caller-supplied context block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Model hint from the start request (`auto`, `qwen-max`, `openai`).
    pub model_hint: String,
    /// Detected perspective, set once `DetectingPerspective` commits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perspective: Option<Perspective>,
    /// Detected gaps, set once `AnalyzingGaps` commits (may be empty).
    #[serde(default)]
    pub gaps: Vec<Gap>,
    /// Improvement suggestions returned by gap analysis.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Accumulated translation output. Final content once `Translating`
    /// commits; empty for cancelled sessions.
    #[serde(default)]
    pub partial_output: String,
    /// Stable failure category, set when status is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Checkpoint {
    /// Fresh checkpoint for a new session.
    pub fn new(
        content: impl Into<String>,
        direction: Direction,
        context: Option<String>,
        model_hint: impl Into<String>,
    ) -> Self {
        Self {
            stage: Stage::Idle,
            status: SessionStatus::Active,
            direction,
            content: content.into(),
            context,
            model_hint: model_hint.into(),
            perspective: None,
            gaps: Vec::new(),
            suggestions: Vec::new(),
            partial_output: String::new(),
            failure_reason: None,
        }
    }

    /// The stage a resumed execution should run next, if any.
    pub fn next_stage(&self) -> Option<Stage> {
        if self.status.is_terminal() {
            return None;
        }
        self.stage.next()
    }
}
