//! # Formsync - Discovery-and-sync cache for incomplete form catalogs
//!
//! The remote service only lists *active* forms, but resolves any ID on
//! request. Formsync reconstructs the complete catalog anyway:
//! - SQLite-backed record store with schema migrations and sync metadata
//! - Gap detection over the known active IDs
//! - Bounded probing (single, batched, retried, beyond the known maximum)
//!   guarded by a circuit breaker
//! - Full, incremental and hybrid sync cycles with staleness tracking

pub mod source;
pub mod record;
pub mod storage;
pub mod gaps;
pub mod probe;
pub mod sync;
pub mod progress;
pub mod cancel;
pub mod config;

// Re-exports for convenient access
pub use source::{FetchActiveList, FetchById, FetchError};
pub use record::FormRecord;
pub use storage::{FormStore, StorageErrorKind, UpsertOutcome};
pub use gaps::{find_id_gaps, GapDetector};
pub use probe::{CircuitBreaker, ProbeResult, ProbeStats, Prober};
pub use sync::{StalenessTracker, SyncError, SyncOptions, SyncOrchestrator, SyncResult};
pub use progress::{SyncPhase, SyncProgress};
pub use cancel::CancellationToken;

/// Result type alias for Formsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Formsync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error ({kind}): {source}")]
    Storage {
        kind: StorageErrorKind,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Remote error: {0}")]
    Remote(#[from] FetchError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(source: rusqlite::Error) -> Self {
        Error::Storage {
            kind: StorageErrorKind::classify(&source),
            source,
        }
    }
}

impl Error {
    /// The store is damaged and should be rebuilt rather than retried
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Storage {
                kind: StorageErrorKind::Corruption,
                ..
            }
        )
    }
}
