//! # liaison-runtime
//!
//! The workflow engine proper: the stage sequencer that drives a session
//! through perspective detection, gap analysis, and streaming
//! translation; the stream multiplexer that fans ordered events out to
//! subscribers; and the session manager that enforces single active
//! execution per session and exposes start/resume/cancel/subscribe.
//!
//! Embedders construct a [`SessionManager`] over a checkpoint store, a
//! history store, and a provider factory, then drive everything through
//! it. Transports (SSE, RPC) live outside this crate.

#![deny(unsafe_code)]

pub mod errors;
pub mod history;
pub mod multiplexer;
pub mod sequencer;
pub mod session_manager;

pub use errors::WorkflowError;
pub use multiplexer::{EventStream, StreamMultiplexer, SubscribeError};
pub use sequencer::StageSequencer;
pub use session_manager::{SessionHandle, SessionManager, StartRequest};
