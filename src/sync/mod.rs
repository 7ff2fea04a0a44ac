//! Sync - full, incremental and hybrid reconstruction of the catalog
//!
//! A sync runs four strictly ordered phases:
//! 1. fetch-active: mirror the listing endpoint
//! 2. probe-gaps: look up IDs missing below the highest active ID
//! 3. probe-beyond-max: scan upward past the highest active ID
//! 4. completion: record when the last full sync happened

pub mod orchestrator;
pub mod staleness;

pub use orchestrator::SyncOrchestrator;
pub use staleness::{is_record_stale, StalenessTracker, LAST_FULL_SYNC_KEY};

use std::fmt;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::gaps::DEFAULT_START_ID;
use crate::probe::{BeyondMaxOptions, ProbeStats};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Every record is refreshed and every gap re-probed
    Full,
    /// Only new or stale records are written
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub force_full: bool,
    /// Cached records younger than this are not rewritten by incremental syncs
    pub max_cache_age: Duration,
    /// Consecutive gap-probe failures before the rest of the gaps are skipped
    pub circuit_threshold: u32,
    pub beyond_max: BeyondMaxOptions,
    /// Lower bound for gap detection
    pub gap_start_id: u64,
    pub probe_gaps: bool,
    pub probe_beyond_max: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force_full: false,
            max_cache_age: Duration::from_secs(24 * 3600),
            circuit_threshold: 5,
            beyond_max: BeyondMaxOptions::default(),
            gap_start_id: DEFAULT_START_ID,
            probe_gaps: true,
            probe_beyond_max: true,
        }
    }
}

impl SyncOptions {
    pub fn validate(&self) -> Result<()> {
        if self.circuit_threshold == 0 {
            return Err(Error::Configuration(
                "circuit_threshold must be at least 1".to_string(),
            ));
        }
        if self.gap_start_id == 0 {
            return Err(Error::Configuration("gap_start_id must be positive".to_string()));
        }
        self.beyond_max.validate()
    }

    pub fn mode(&self) -> SyncMode {
        if self.force_full {
            SyncMode::Full
        } else {
            SyncMode::Incremental
        }
    }
}

/// Outcome of one sync invocation.
///
/// A non-empty `errors` list does not mean the sync failed: total failure
/// is reported as [`Error::Sync`] instead.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub mode: SyncMode,
    /// Forms that were new to the cache
    pub discovered: usize,
    /// Cached forms that were refreshed
    pub updated: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub last_sync_time: DateTime<Utc>,
    pub gap_stats: ProbeStats,
    pub beyond_max_stats: ProbeStats,
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sync Result ({}):", self.mode)?;
        writeln!(f, "  Discovered: {}", self.discovered)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Gap probes: {}", self.gap_stats)?;
        writeln!(f, "  Beyond-max probes: {}", self.beyond_max_stats)?;
        writeln!(f, "  Errors: {}", self.errors.len())?;
        write!(f, "  Duration: {}ms", self.duration_ms)
    }
}

/// A sync that made no progress at all
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Sync failed: {message}")]
pub struct SyncError {
    pub message: String,
    /// Every error collected before giving up
    pub errors: Vec<String>,
}

impl SyncError {
    pub fn new(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            message: message.into(),
            errors,
        }
    }
}
