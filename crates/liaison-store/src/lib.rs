//! # liaison-store
//!
//! Persistence layer for the Liaison workflow engine:
//!
//! - **[`CheckpointStore`]**: opaque versioned blobs with compare-and-swap
//!   writes, the optimistic lock that enforces single active execution
//!   per session.
//! - **[`HistoryStore`]**: insert-once durable translation records.
//! - **Backends**: in-memory (tests, embedders) and `SQLite`
//!   (`rusqlite` + `r2d2` pool, WAL, versioned migrations).

#![deny(unsafe_code)]

pub mod checkpoint;
pub mod errors;
pub mod history;
pub mod memory;
pub mod sqlite;

pub use checkpoint::{CheckpointStore, VersionedCheckpoint};
pub use errors::{Result, StoreError};
pub use history::HistoryStore;
pub use memory::{MemoryCheckpointStore, MemoryHistoryStore};
pub use sqlite::{SqliteStore, SqliteStoreConfig};
