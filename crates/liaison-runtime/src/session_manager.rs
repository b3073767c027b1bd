//! Session lifecycle: start, resume, cancel, and the single-active-
//! execution guarantee.
//!
//! The manager keeps an in-process registry of running executions for
//! fast conflict checks and cancellation, but the registry is not the
//! authority: the conditional claim write on the checkpoint store is.
//! Two processes (or two racing resumes) both reach the claim; exactly
//! one write succeeds and the loser gets a conflict without ever
//! touching the stream.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use liaison_core::session::{new_session_id, Checkpoint, Direction};
use liaison_llm::factory::ProviderFactory;
use liaison_settings::types::{StreamSettings, WorkflowSettings};
use liaison_store::checkpoint::{CheckpointStore, VersionedCheckpoint};
use liaison_store::errors::StoreError;
use liaison_store::history::HistoryStore;

use crate::errors::WorkflowError;
use crate::history::HistoryRecorder;
use crate::multiplexer::{EventStream, StreamMultiplexer, SubscribeError};
use crate::sequencer::StageSequencer;

/// Caller input for a new session.
#[derive(Clone, Debug)]
pub struct StartRequest {
    /// Text to translate. Must be non-empty.
    pub content: String,
    /// Direction wire string (`pm_to_dev` or `dev_to_pm`).
    pub direction: String,
    /// Optional context block passed through to the provider.
    pub context: Option<String>,
    /// Model hint (`auto`, `qwen-max`, `openai`). `None` means `auto`.
    pub model: Option<String>,
}

/// A started (or resumed) session: its id plus a live event subscription
/// beginning at the chosen sequence.
pub struct SessionHandle {
    /// Session id.
    pub session_id: String,
    /// Ordered event stream for this execution.
    pub events: EventStream,
}

/// Entry point for embedders: owns the store handles, the provider
/// factory, the multiplexer, and the registry of running executions.
pub struct SessionManager {
    store: Arc<dyn CheckpointStore>,
    history: Arc<dyn HistoryStore>,
    factory: Arc<dyn ProviderFactory>,
    mux: Arc<StreamMultiplexer>,
    sequencer: Arc<StageSequencer>,
    active: Arc<DashMap<String, CancellationToken>>,
}

impl SessionManager {
    /// Wire up a manager over the given stores and provider factory.
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        history: Arc<dyn HistoryStore>,
        factory: Arc<dyn ProviderFactory>,
        workflow: WorkflowSettings,
        stream: StreamSettings,
    ) -> Self {
        let mux = Arc::new(StreamMultiplexer::new(
            stream.backlog_capacity,
            stream.subscriber_buffer,
        ));
        let sequencer = Arc::new(StageSequencer::new(store.clone(), mux.clone(), workflow));
        Self {
            store,
            history,
            factory,
            mux,
            sequencer,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Create a session and begin executing it in the background.
    ///
    /// Validation, provider construction, and the creating checkpoint
    /// write all happen before anything is spawned, so bad requests and
    /// missing credentials fail synchronously with no session left
    /// behind.
    pub async fn start(&self, request: StartRequest) -> Result<SessionHandle, WorkflowError> {
        let direction: Direction = request.direction.parse()?;
        if request.content.trim().is_empty() {
            return Err(WorkflowError::EmptyContent);
        }
        let model_hint = request.model.unwrap_or_else(|| "auto".to_owned());
        let provider = self.factory.create(&model_hint).await?;

        let session_id = new_session_id();
        let checkpoint = Checkpoint::new(request.content, direction, request.context, model_hint);
        let version = self.store.write(&session_id, &checkpoint, 0)?;
        info!(session_id = %session_id, direction = %direction, "session started");

        let claimed = VersionedCheckpoint {
            checkpoint,
            version,
        };
        self.launch(session_id.clone(), provider, claimed)?;
        let events = self.subscribe(&session_id, 0).map_err(internal)?;
        Ok(SessionHandle { session_id, events })
    }

    /// Resume an interrupted session from its last committed checkpoint.
    ///
    /// Exactly one resume wins: the claim is a conditional write at the
    /// version this call observed, so a concurrent execution (local or
    /// in another process) makes the claim fail with a conflict.
    pub async fn resume(&self, session_id: &str) -> Result<SessionHandle, WorkflowError> {
        if self.active.contains_key(session_id) {
            return Err(WorkflowError::SessionConflict(session_id.to_owned()));
        }
        let Some(stored) = self.store.read(session_id)? else {
            return Err(WorkflowError::SessionNotFound(session_id.to_owned()));
        };
        if stored.checkpoint.status.is_terminal() {
            return Err(WorkflowError::SessionTerminal(session_id.to_owned()));
        }
        let provider = self.factory.create(&stored.checkpoint.model_hint).await?;

        // The claim: rewrite the checkpoint unchanged at the observed
        // version. Losing this race means someone else is executing.
        let version = self
            .store
            .write(session_id, &stored.checkpoint, stored.version)
            .map_err(|err| match err {
                StoreError::VersionConflict { .. } => {
                    WorkflowError::SessionConflict(session_id.to_owned())
                }
                other => WorkflowError::from(other),
            })?;
        info!(
            session_id = %session_id,
            stage = %stored.checkpoint.stage,
            "session resumed"
        );

        let claimed = VersionedCheckpoint {
            checkpoint: stored.checkpoint,
            version,
        };
        self.launch(session_id.to_owned(), provider, claimed)?;
        let events = self.subscribe(session_id, 0).map_err(internal)?;
        Ok(SessionHandle {
            session_id: session_id.to_owned(),
            events,
        })
    }

    /// Request cooperative cancellation of a running execution.
    ///
    /// Returns `false` when no execution is running locally; the request
    /// is best-effort and never fails.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(token) => {
                debug!(session_id = %session_id, "cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Attach an additional subscriber to a session's event stream,
    /// replaying retained events from `from_seq`.
    pub fn subscribe(
        &self,
        session_id: &str,
        from_seq: u64,
    ) -> Result<EventStream, SubscribeError> {
        self.mux.subscribe(session_id, from_seq)
    }

    /// Number of executions currently running in this process.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// The history store, for rendering past translations.
    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    fn launch(
        &self,
        session_id: String,
        provider: Arc<dyn liaison_llm::provider::Provider>,
        claimed: VersionedCheckpoint,
    ) -> Result<(), WorkflowError> {
        self.mux.open_session(&session_id);

        let token = match self.active.entry(session_id.clone()) {
            Entry::Occupied(_) => {
                return Err(WorkflowError::SessionConflict(session_id));
            }
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                let _ = slot.insert(token.clone());
                token
            }
        };

        let recorder_events = self.subscribe(&session_id, 0).map_err(internal)?;
        let _ = HistoryRecorder::spawn(self.history.clone(), session_id.clone(), recorder_events);

        let sequencer = self.sequencer.clone();
        let active = self.active.clone();
        let _ = tokio::spawn(async move {
            let result = sequencer.run(&session_id, provider, claimed, token).await;
            match result {
                Ok(()) => {}
                Err(WorkflowError::Cancelled) => {
                    debug!(session_id = %session_id, "execution ended by cancellation");
                }
                Err(WorkflowError::CheckpointConflict(_)) => {
                    info!(
                        session_id = %session_id,
                        "execution aborted: another writer advanced the session"
                    );
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "execution failed");
                }
            }
            let _ = active.remove(&session_id);
        });
        Ok(())
    }
}

fn internal(err: SubscribeError) -> WorkflowError {
    WorkflowError::Internal(err.to_string())
}
