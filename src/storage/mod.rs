//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - forms(id, title, entry_count, is_active, is_trash, last_synced, raw_data)
//! - schema_version(version, applied_at)
//! - sync_metadata(key, value, updated_at)

pub mod schema;
pub mod sqlite;

pub use sqlite::{CacheStats, FormStore, StorageErrorKind, UpsertOutcome};
