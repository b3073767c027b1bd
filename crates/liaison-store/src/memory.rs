//! In-memory store backends for tests and embedders.

use std::collections::HashMap;

use parking_lot::RwLock;

use liaison_core::record::TranslationRecord;
use liaison_core::session::Checkpoint;

use crate::checkpoint::{CheckpointStore, VersionedCheckpoint};
use crate::errors::{Result, StoreError};
use crate::history::HistoryStore;

/// In-memory [`CheckpointStore`] with the same compare-and-swap semantics
/// as the `SQLite` backend.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    sessions: RwLock<HashMap<String, VersionedCheckpoint>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read(&self, session_id: &str) -> Result<Option<VersionedCheckpoint>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    fn write(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
        expected_version: u64,
    ) -> Result<u64> {
        let mut sessions = self.sessions.write();
        let stored = sessions.get(session_id).map(|v| v.version);
        if stored.is_none() && expected_version != 0 {
            return Err(StoreError::NotFound(session_id.to_owned()));
        }
        let stored = stored.unwrap_or(0);
        if stored != expected_version {
            return Err(StoreError::VersionConflict {
                session_id: session_id.to_owned(),
                expected: expected_version,
                stored,
            });
        }
        let next = stored + 1;
        let _ = sessions.insert(
            session_id.to_owned(),
            VersionedCheckpoint {
                checkpoint: checkpoint.clone(),
                version: next,
            },
        );
        Ok(next)
    }
}

/// In-memory [`HistoryStore`].
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<TranslationRecord>>,
}

impl MemoryHistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn record(&self, record: &TranslationRecord) -> Result<()> {
        let mut records = self.records.write();
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::AlreadyExists(record.id.clone()));
        }
        records.push(record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<TranslationRecord>> {
        Ok(self.records.read().iter().find(|r| r.id == id).cloned())
    }

    fn list(&self, limit: usize) -> Result<Vec<TranslationRecord>> {
        Ok(self.records.read().iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use liaison_core::session::{Direction, SessionStatus, Stage};

    fn checkpoint() -> Checkpoint {
        Checkpoint::new("content", Direction::PmToDev, None, "auto")
    }

    #[test]
    fn create_requires_expected_zero() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.write("sess_1", &checkpoint(), 0).unwrap(), 1);
        assert_matches!(
            store.write("sess_1", &checkpoint(), 0),
            Err(StoreError::VersionConflict {
                expected: 0,
                stored: 1,
                ..
            })
        );
    }

    #[test]
    fn versions_are_strictly_increasing() {
        let store = MemoryCheckpointStore::new();
        let mut cp = checkpoint();
        let v1 = store.write("sess_1", &cp, 0).unwrap();
        cp.stage = Stage::DetectingPerspective;
        let v2 = store.write("sess_1", &cp, v1).unwrap();
        cp.stage = Stage::AnalyzingGaps;
        let v3 = store.write("sess_1", &cp, v2).unwrap();
        assert!(v1 < v2 && v2 < v3);
    }

    #[test]
    fn stale_write_rejected_without_mutation() {
        let store = MemoryCheckpointStore::new();
        let mut cp = checkpoint();
        let v1 = store.write("sess_1", &cp, 0).unwrap();
        cp.stage = Stage::DetectingPerspective;
        let _v2 = store.write("sess_1", &cp, v1).unwrap();

        let mut stale = checkpoint();
        stale.status = SessionStatus::Failed;
        assert_matches!(
            store.write("sess_1", &stale, v1),
            Err(StoreError::VersionConflict { .. })
        );

        // stored state unchanged by the losing write
        let current = store.read("sess_1").unwrap().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.checkpoint.stage, Stage::DetectingPerspective);
        assert_eq!(current.checkpoint.status, SessionStatus::Active);
    }

    #[test]
    fn update_of_missing_session_is_not_found() {
        let store = MemoryCheckpointStore::new();
        assert_matches!(
            store.write("sess_missing", &checkpoint(), 3),
            Err(StoreError::NotFound(_))
        );
    }

    #[test]
    fn read_unknown_session_is_none() {
        let store = MemoryCheckpointStore::new();
        assert!(store.read("sess_missing").unwrap().is_none());
    }

    #[test]
    fn history_records_are_insert_once() {
        let store = MemoryHistoryStore::new();
        let record = TranslationRecord::from_checkpoint("tr_1", &checkpoint());
        store.record(&record).unwrap();
        assert_matches!(store.record(&record), Err(StoreError::AlreadyExists(_)));
        assert!(store.get("tr_1").unwrap().is_some());
        assert_eq!(store.list(10).unwrap().len(), 1);
    }

    #[test]
    fn history_list_is_newest_first_and_bounded() {
        let store = MemoryHistoryStore::new();
        for i in 0..5 {
            let record = TranslationRecord::from_checkpoint(format!("tr_{i}"), &checkpoint());
            store.record(&record).unwrap();
        }
        let listed = store.list(3).unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, "tr_4");
    }
}
