//! # liaison-core
//!
//! Domain types shared across the Liaison workflow engine:
//!
//! - **Session model**: stages, statuses, directions, perspectives, gaps,
//!   and the versioned [`Checkpoint`](session::Checkpoint) snapshot.
//! - **Workflow events**: the ordered [`WorkflowEvent`](events::WorkflowEvent)
//!   stream consumed by transports and the history adapter.
//! - **Records**: the immutable [`TranslationRecord`](record::TranslationRecord)
//!   produced when a session completes.
//! - **Logging**: `tracing` subscriber initialization.

#![deny(unsafe_code)]

pub mod events;
pub mod logging;
pub mod record;
pub mod session;

pub use events::{EventEnvelope, WorkflowEvent};
pub use record::TranslationRecord;
pub use session::{
    Checkpoint, Direction, Gap, Perspective, SessionStatus, Stage, new_record_id, new_session_id,
};
