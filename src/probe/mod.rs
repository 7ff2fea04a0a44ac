//! Probing - per-ID discovery of forms the listing endpoint hides
//!
//! A probe is one lookup of one ID. Probes never raise: every outcome is
//! captured in a [`ProbeResult`] so batches and syncs can make partial
//! progress past individual failures.

pub mod breaker;
pub mod retry;
pub mod prober;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitOpen, CircuitState};
pub use prober::{BeyondMaxOptions, ProbeConfig, Prober};
pub use retry::{RetryPolicy, MAX_RETRIES_CEILING};

use std::fmt;
use crate::record::FormRecord;
use crate::source::FetchError;
use crate::storage::UpsertOutcome;

/// Maximum number of error messages kept in [`ProbeStats::errors`]
pub const MAX_TRACKED_ERRORS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrorKind {
    /// The form definitely does not exist (404)
    NotFound,
    /// Transport failure or non-404 error status
    Remote,
    /// The service answered with something that is not a usable form
    Validation,
    /// The form was fetched but could not be written to the cache
    Storage,
    /// Not attempted: the circuit breaker was open
    CircuitOpen,
    /// Not attempted: the caller cancelled the batch
    Cancelled,
}

/// Why a probe did not produce a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub message: String,
    /// HTTP-status-like code, when the remote supplied one
    pub status: Option<u16>,
    retryable: bool,
}

impl ProbeError {
    pub fn from_fetch(id: u64, err: &FetchError) -> Self {
        let kind = if err.is_not_found() {
            ProbeErrorKind::NotFound
        } else if matches!(err, FetchError::InvalidResponse(_)) {
            ProbeErrorKind::Validation
        } else {
            ProbeErrorKind::Remote
        };
        Self {
            kind,
            message: format!("Form {}: {}", id, err),
            status: err.status_code(),
            retryable: err.is_retryable(),
        }
    }

    pub fn validation(id: u64, reason: impl fmt::Display) -> Self {
        Self::other(ProbeErrorKind::Validation, format!("Form {}: malformed response: {}", id, reason))
    }

    pub fn storage(id: u64, reason: impl fmt::Display) -> Self {
        Self::other(ProbeErrorKind::Storage, format!("Form {}: failed to cache: {}", id, reason))
    }

    pub fn circuit_open(id: u64) -> Self {
        Self::other(ProbeErrorKind::CircuitOpen, format!("Form {}: circuit breaker open", id))
    }

    pub fn cancelled(id: u64) -> Self {
        Self::other(ProbeErrorKind::Cancelled, format!("Form {}: cancelled", id))
    }

    fn other(kind: ProbeErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            status: None,
            retryable: false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProbeErrorKind::NotFound
    }

    /// Whether backing off and trying again can help
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Outcome of a single probe attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub id: u64,
    pub found: bool,
    pub record: Option<FormRecord>,
    /// Whether the found record was new to the cache
    pub outcome: Option<UpsertOutcome>,
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    pub fn found(record: FormRecord, outcome: UpsertOutcome) -> Self {
        Self {
            id: record.id,
            found: true,
            record: Some(record),
            outcome: Some(outcome),
            error: None,
        }
    }

    pub fn failed(id: u64, error: ProbeError) -> Self {
        Self {
            id,
            found: false,
            record: None,
            outcome: None,
            error: Some(error),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.error.as_ref().is_some_and(ProbeError::is_not_found)
    }

    /// The error, unless it is an expected "not found" or a cancellation
    pub fn reportable_error(&self) -> Option<&ProbeError> {
        self.error
            .as_ref()
            .filter(|e| !matches!(e.kind, ProbeErrorKind::NotFound | ProbeErrorKind::Cancelled))
    }
}

/// Counters for one batch or scan. `attempted == found + failed` always.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProbeStats {
    pub attempted: usize,
    pub found: usize,
    pub failed: usize,
    /// Reportable errors in order, capped at [`MAX_TRACKED_ERRORS`]
    pub errors: Vec<String>,
}

impl ProbeStats {
    pub fn record(&mut self, result: &ProbeResult) {
        self.attempted += 1;
        if result.found {
            self.found += 1;
        } else {
            self.failed += 1;
        }
        if let Some(err) = result.reportable_error() {
            if self.errors.len() < MAX_TRACKED_ERRORS {
                self.errors.push(err.to_string());
            }
        }
    }
}

impl fmt::Display for ProbeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempted, {} found, {} failed",
            self.attempted, self.found, self.failed
        )
    }
}
