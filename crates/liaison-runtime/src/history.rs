//! History adapter: a background subscriber that persists the final
//! record of a completed session.
//!
//! Recording rides the event stream rather than the sequencer so that
//! history stays an observer concern: a history write failure never
//! affects the session outcome, and only `Done` produces a record.
//! Failed and cancelled sessions leave no history.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use liaison_core::events::WorkflowEvent;
use liaison_store::history::HistoryStore;

use crate::multiplexer::EventStream;

/// Consumes a session's event stream and writes the `Done` record to the
/// history store.
pub struct HistoryRecorder;

impl HistoryRecorder {
    /// Spawn the recorder task for one session. The task ends at the
    /// first terminal event (or when the stream closes).
    pub fn spawn(
        history: Arc<dyn HistoryStore>,
        session_id: String,
        mut events: EventStream,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = events.next().await {
                match envelope.event {
                    WorkflowEvent::Done { record } => {
                        match history.record(&record) {
                            Ok(()) => {
                                debug!(session_id = %session_id, record_id = %record.id, "history record written");
                            }
                            Err(err) => {
                                warn!(session_id = %session_id, error = %err, "failed to write history record");
                            }
                        }
                        return;
                    }
                    WorkflowEvent::Error { .. } => return,
                    _ => {}
                }
            }
        })
    }
}
