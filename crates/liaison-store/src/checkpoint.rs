//! Checkpoint store contract.

use liaison_core::session::Checkpoint;

use crate::errors::Result;

/// A checkpoint together with its stored version.
#[derive(Clone, Debug, PartialEq)]
pub struct VersionedCheckpoint {
    /// The snapshot.
    pub checkpoint: Checkpoint,
    /// Stored version (starts at 1 on first write, strictly increasing).
    pub version: u64,
}

/// Versioned key/value persistence for session progress.
///
/// The store never interprets checkpoint contents. Writes are conditional:
/// `expected_version` must match the stored version, with `0` meaning
/// "create, must not exist". On mismatch the write is rejected with
/// [`StoreError::VersionConflict`](crate::StoreError::VersionConflict) and
/// stored state is untouched; the caller must abort its execution attempt
/// rather than overwrite. This is what enforces single active execution
/// per session; there is no separate lock manager.
///
/// Reads and writes are expected to be fast and are synchronous; provider
/// calls are the only long-latency operations in the engine.
pub trait CheckpointStore: Send + Sync {
    /// Read the current checkpoint and version, if one exists.
    fn read(&self, session_id: &str) -> Result<Option<VersionedCheckpoint>>;

    /// Conditionally write a checkpoint, returning the new version.
    ///
    /// `expected_version == 0` creates the session and fails with
    /// `VersionConflict` if it already exists. Any other value must equal
    /// the stored version exactly.
    fn write(&self, session_id: &str, checkpoint: &Checkpoint, expected_version: u64)
    -> Result<u64>;
}
