//! History store contract.

use liaison_core::record::TranslationRecord;

use crate::errors::Result;

/// Durable record of completed translations.
///
/// Records are written exactly once, when a session reaches `Completed`,
/// and are immutable thereafter. The workflow core only ever inserts;
/// `get`/`list` serve transports rendering past translations.
pub trait HistoryStore: Send + Sync {
    /// Insert a record. Fails with
    /// [`StoreError::AlreadyExists`](crate::StoreError::AlreadyExists) if
    /// the id is taken.
    fn record(&self, record: &TranslationRecord) -> Result<()>;

    /// Fetch a record by id.
    fn get(&self, id: &str) -> Result<Option<TranslationRecord>>;

    /// List records, newest first, up to `limit`.
    fn list(&self, limit: usize) -> Result<Vec<TranslationRecord>>;
}
