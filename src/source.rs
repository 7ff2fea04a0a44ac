//! Remote form sources
//!
//! The engine never talks HTTP itself. Callers inject two collaborators:
//! - a list source returning the active forms the listing endpoint exposes
//! - a per-ID source that resolves any form regardless of its status
//!
//! Both are plain traits with blanket impls for closures, so tests and
//! transports can hand in whatever fits.

use serde_json::Value;

/// Failure reported by a remote source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The service answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection refused, reset, DNS failure and friends
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered but the body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    /// Build a 404 for the given form ID
    pub fn not_found(id: u64) -> Self {
        FetchError::Status {
            status: 404,
            message: format!("form {} not found", id),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        FetchError::Status {
            status,
            message: message.into(),
        }
    }

    /// HTTP-status-like code, when the failure carries one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The form definitely does not exist
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Whether backing off and trying again can help.
    ///
    /// Timeouts, transport failures, 408, 429 and 5xx are transient.
    /// Everything else (including 404) is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            FetchError::Timeout(_) | FetchError::Transport(_) => true,
            FetchError::InvalidResponse(_) => false,
        }
    }
}

/// Per-ID lookup against the remote service.
pub trait FetchById {
    fn fetch_by_id(&self, id: u64) -> Result<Value, FetchError>;
}

impl<F> FetchById for F
where
    F: Fn(u64) -> Result<Value, FetchError>,
{
    fn fetch_by_id(&self, id: u64) -> Result<Value, FetchError> {
        self(id)
    }
}

/// Listing endpoint returning only active forms.
pub trait FetchActiveList {
    fn fetch_active_list(&self) -> Result<Value, FetchError>;
}

impl<F> FetchActiveList for F
where
    F: Fn() -> Result<Value, FetchError>,
{
    fn fetch_active_list(&self) -> Result<Value, FetchError> {
        self()
    }
}
