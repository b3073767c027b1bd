//! Stage sequencer: drives one session's execution attempt through the
//! fixed stage order, committing each stage's checkpoint before emitting
//! its events.
//!
//! Commit-then-emit is the core ordering rule: an observer that sees a
//! `StageComplete` can rely on the corresponding checkpoint being
//! durable. A version conflict on any commit means another execution
//! claimed the session; this attempt aborts without emitting anything
//! further, because the stream now belongs to the winner.

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use liaison_core::events::WorkflowEvent;
use liaison_core::record::TranslationRecord;
use liaison_core::session::{new_record_id, Checkpoint, SessionStatus, Stage};
use liaison_llm::provider::{
    Provider, ProviderError, ProviderResult, TokenChunk, TranslateRequest,
};
use liaison_settings::types::WorkflowSettings;
use liaison_store::checkpoint::{CheckpointStore, VersionedCheckpoint};

use crate::errors::WorkflowError;
use crate::multiplexer::StreamMultiplexer;

/// Drives stage execution for sessions. One sequencer instance is shared
/// across all sessions; per-session state lives in the checkpoint.
pub struct StageSequencer {
    store: Arc<dyn CheckpointStore>,
    mux: Arc<StreamMultiplexer>,
    workflow: WorkflowSettings,
}

impl StageSequencer {
    /// Create a sequencer over the given store and multiplexer.
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        mux: Arc<StreamMultiplexer>,
        workflow: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            mux,
            workflow,
        }
    }

    /// Run the session from its last committed checkpoint to a terminal
    /// state, or until cancelled or out-raced by another execution.
    ///
    /// `start` must be the claimed checkpoint: the caller has already
    /// performed a conditional write at the observed version, so `start.version`
    /// is this execution's exclusive baseline.
    pub async fn run(
        &self,
        session_id: &str,
        provider: Arc<dyn Provider>,
        start: VersionedCheckpoint,
        cancel: CancellationToken,
    ) -> Result<(), WorkflowError> {
        let mut checkpoint = start.checkpoint;
        let mut version = start.version;

        while let Some(stage) = checkpoint.next_stage() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(session_id, &mut checkpoint, &mut version);
            }
            debug!(session_id, stage = %stage, "running stage");

            let outcome = match stage {
                Stage::DetectingPerspective => {
                    self.run_detection(session_id, provider.as_ref(), &mut checkpoint, &cancel)
                        .await
                }
                Stage::AnalyzingGaps => {
                    self.run_analysis(session_id, provider.as_ref(), &mut checkpoint, &cancel)
                        .await
                }
                Stage::Translating => {
                    self.run_translation(session_id, provider.as_ref(), &mut checkpoint, &cancel)
                        .await
                }
                Stage::Idle => {
                    return Err(WorkflowError::Internal(
                        "idle is never a runnable stage".into(),
                    ));
                }
            };

            match outcome {
                Ok(events) => {
                    checkpoint.stage = stage;
                    if let Err(err) = self.commit(session_id, &checkpoint, &mut version) {
                        return self.finish_failed(session_id, &mut checkpoint, &mut version, err);
                    }
                    for event in events {
                        let _ = self.mux.publish(session_id, event);
                    }
                    let _ = self
                        .mux
                        .publish(session_id, WorkflowEvent::StageComplete { stage });
                }
                Err(WorkflowError::Cancelled) => {
                    return self.finish_cancelled(session_id, &mut checkpoint, &mut version);
                }
                Err(err) => {
                    return self.finish_failed(session_id, &mut checkpoint, &mut version, err);
                }
            }
        }

        if checkpoint.status == SessionStatus::Completed {
            let record = TranslationRecord::from_checkpoint(new_record_id(), &checkpoint);
            info!(session_id, record_id = %record.id, "session completed");
            let _ = self.mux.publish(session_id, WorkflowEvent::Done { record });
        }
        Ok(())
    }

    // ── stages ──

    async fn run_detection(
        &self,
        session_id: &str,
        provider: &dyn Provider,
        checkpoint: &mut Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkflowEvent>, WorkflowError> {
        let content = checkpoint.content.clone();
        let perspective = self
            .call_with_retry(session_id, Stage::DetectingPerspective, cancel, || {
                provider.classify_perspective(&content)
            })
            .await?;
        checkpoint.perspective = Some(perspective);
        Ok(vec![WorkflowEvent::PerspectiveDetected { perspective }])
    }

    async fn run_analysis(
        &self,
        session_id: &str,
        provider: &dyn Provider,
        checkpoint: &mut Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkflowEvent>, WorkflowError> {
        let Some(perspective) = checkpoint.perspective else {
            return Err(WorkflowError::Internal(
                "gap analysis requires a committed perspective".into(),
            ));
        };
        let content = checkpoint.content.clone();
        let direction = checkpoint.direction;
        let analysis = self
            .call_with_retry(session_id, Stage::AnalyzingGaps, cancel, || {
                provider.analyze_gaps(&content, perspective, direction)
            })
            .await?;
        checkpoint.gaps = analysis.gaps;
        checkpoint.suggestions = analysis.suggestions;
        Ok(checkpoint
            .gaps
            .iter()
            .map(|gap| WorkflowEvent::GapFound { gap: gap.clone() })
            .collect())
    }

    /// Stream the translation, publishing each token as it arrives.
    ///
    /// Tokens are published live (before the stage commit) because they
    /// are provisional by nature; only `StageComplete` implies
    /// durability. A retry is permitted only while zero tokens have been
    /// published, so observers never see a partial sequence restart.
    async fn run_translation(
        &self,
        session_id: &str,
        provider: &dyn Provider,
        checkpoint: &mut Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkflowEvent>, WorkflowError> {
        let Some(perspective) = checkpoint.perspective else {
            return Err(WorkflowError::Internal(
                "translation requires a committed perspective".into(),
            ));
        };
        let request = TranslateRequest {
            content: checkpoint.content.clone(),
            context: checkpoint.context.clone(),
            perspective,
            gaps: checkpoint.gaps.clone(),
            direction: checkpoint.direction,
        };

        let mut attempt = 1u32;
        loop {
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(WorkflowError::Cancelled),
                r = provider.translate_stream(&request) => r,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(err) => match self.next_attempt(session_id, cancel, attempt, &err, 0).await? {
                    Some(next) => {
                        attempt = next;
                        continue;
                    }
                    None => return Err(WorkflowError::Provider(err)),
                },
            };

            let mut emitted = 0usize;
            let failure = loop {
                let chunk = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(WorkflowError::Cancelled),
                    c = stream.next() => c,
                };
                match chunk {
                    Some(Ok(TokenChunk::Delta(delta))) => {
                        if delta.is_empty() {
                            continue;
                        }
                        checkpoint.partial_output.push_str(&delta);
                        let _ = self
                            .mux
                            .publish(session_id, WorkflowEvent::Token { delta });
                        emitted += 1;
                    }
                    Some(Ok(TokenChunk::Done)) => {
                        checkpoint.status = SessionStatus::Completed;
                        return Ok(Vec::new());
                    }
                    Some(Err(err)) => break err,
                    None => break ProviderError::Malformed {
                        message: "token stream ended without a done marker".into(),
                    },
                }
            };

            match self
                .next_attempt(session_id, cancel, attempt, &failure, emitted)
                .await?
            {
                Some(next) => attempt = next,
                None => return Err(WorkflowError::Provider(failure)),
            }
        }
    }

    // ── terminal transitions ──

    fn finish_cancelled(
        &self,
        session_id: &str,
        checkpoint: &mut Checkpoint,
        version: &mut u64,
    ) -> Result<(), WorkflowError> {
        checkpoint.status = SessionStatus::Cancelled;
        checkpoint.partial_output.clear();
        match self.commit(session_id, checkpoint, version) {
            Ok(()) => {}
            Err(conflict @ WorkflowError::CheckpointConflict(_)) => return Err(conflict),
            Err(persist) => {
                warn!(session_id, error = %persist, "failed to persist cancelled status");
            }
        }
        info!(session_id, "session cancelled");
        let _ = self.mux.publish(
            session_id,
            WorkflowEvent::Error {
                category: "cancelled".into(),
                message: "session cancelled".into(),
            },
        );
        Err(WorkflowError::Cancelled)
    }

    fn finish_failed(
        &self,
        session_id: &str,
        checkpoint: &mut Checkpoint,
        version: &mut u64,
        err: WorkflowError,
    ) -> Result<(), WorkflowError> {
        // A conflict on the stage commit itself lands here too; it must
        // stay silent, not be rewritten into a failed status.
        if matches!(err, WorkflowError::CheckpointConflict(_)) {
            return Err(err);
        }
        let category = err.category();
        checkpoint.status = SessionStatus::Failed;
        checkpoint.failure_reason = Some(category.to_owned());
        match self.commit(session_id, checkpoint, version) {
            Ok(()) => {}
            Err(conflict @ WorkflowError::CheckpointConflict(_)) => return Err(conflict),
            Err(persist) => {
                warn!(session_id, error = %persist, "failed to persist failed status");
            }
        }
        warn!(session_id, category, error = %err, "session failed");
        let _ = self.mux.publish(
            session_id,
            WorkflowEvent::Error {
                category: category.to_owned(),
                message: stable_message(category).to_owned(),
            },
        );
        Err(err)
    }

    // ── helpers ──

    fn commit(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
        version: &mut u64,
    ) -> Result<(), WorkflowError> {
        let next = self.store.write(session_id, checkpoint, *version)?;
        *version = next;
        Ok(())
    }

    async fn call_with_retry<T, F, Fut>(
        &self,
        session_id: &str,
        stage: Stage,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, WorkflowError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 1u32;
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(WorkflowError::Cancelled),
                r = op() => r,
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.workflow.max_stage_attempts {
                        return Err(WorkflowError::Provider(err));
                    }
                    let delay = self.retry_delay(attempt, &err);
                    warn!(
                        session_id,
                        stage = %stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "stage attempt failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(WorkflowError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Decide whether the translation stage gets another attempt after a
    /// stream failure. Returns the next attempt number after backing off,
    /// or `None` when the error is terminal for this stage.
    async fn next_attempt(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
        attempt: u32,
        err: &ProviderError,
        emitted: usize,
    ) -> Result<Option<u32>, WorkflowError> {
        if emitted > 0 || !err.is_retryable() || attempt >= self.workflow.max_stage_attempts {
            return Ok(None);
        }
        let delay = self.retry_delay(attempt, err);
        warn!(
            session_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "translation stream failed before output, retrying"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(WorkflowError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
        Ok(Some(attempt + 1))
    }

    /// Exponential backoff from the configured base, never shorter than a
    /// provider-supplied retry-after.
    fn retry_delay(&self, attempt: u32, err: &ProviderError) -> Duration {
        let shift = u32::min(attempt.saturating_sub(1), 16);
        let backoff = self
            .workflow
            .retry_base_delay_ms
            .saturating_mul(1u64 << shift);
        Duration::from_millis(backoff.max(err.retry_after_ms().unwrap_or(0)))
    }
}

fn stable_message(category: &str) -> &'static str {
    match category {
        "network" => "provider request failed",
        "parse" => "provider response could not be parsed",
        "auth" => "authentication with the provider failed",
        "rate_limit" => "provider rate limit exceeded",
        "api" => "provider rejected the request",
        "persistence" => "persistence failure",
        "cancelled" => "session cancelled",
        _ => "internal error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_honors_retry_after() {
        let sequencer = StageSequencer::new(
            Arc::new(liaison_store::memory::MemoryCheckpointStore::new()),
            Arc::new(StreamMultiplexer::new(16, 16)),
            WorkflowSettings {
                max_stage_attempts: 3,
                retry_base_delay_ms: 500,
            },
        );
        let plain = ProviderError::Api {
            status: 503,
            message: "overloaded".into(),
            retryable: true,
        };
        assert_eq!(sequencer.retry_delay(1, &plain), Duration::from_millis(500));
        assert_eq!(sequencer.retry_delay(2, &plain), Duration::from_millis(1000));
        assert_eq!(sequencer.retry_delay(3, &plain), Duration::from_millis(2000));

        let limited = ProviderError::RateLimited {
            retry_after_ms: 4000,
        };
        assert_eq!(
            sequencer.retry_delay(1, &limited),
            Duration::from_millis(4000)
        );
    }

    #[test]
    fn stable_messages_never_echo_provider_text() {
        assert_eq!(stable_message("auth"), "authentication with the provider failed");
        assert_eq!(stable_message("something_else"), "internal error");
    }
}
