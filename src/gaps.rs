//! Gap detection over known form IDs
//!
//! The listing endpoint hides inactive and trashed forms, but IDs are
//! allocated from one sequence. Every ID missing between the lower bound and
//! the highest known ID is a candidate hidden form worth probing.

use crate::{Error, Result};

/// Default lower bound for gap detection
pub const DEFAULT_START_ID: u64 = 1;

/// Default ceiling on how many IDs a single detection may span
pub const DEFAULT_MAX_SPAN: u64 = 1_000_000;

/// Computes missing IDs in `[start_id, max(known)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapDetector {
    start_id: u64,
    max_span: u64,
}

impl Default for GapDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl GapDetector {
    pub fn new() -> Self {
        Self {
            start_id: DEFAULT_START_ID,
            max_span: DEFAULT_MAX_SPAN,
        }
    }

    /// Lower bound of the scanned range
    pub fn with_start_id(mut self, start_id: u64) -> Self {
        self.start_id = start_id;
        self
    }

    /// Refuse ranges wider than `max_span` IDs
    pub fn with_max_span(mut self, max_span: u64) -> Self {
        self.max_span = max_span;
        self
    }

    pub fn start_id(&self) -> u64 {
        self.start_id
    }

    /// Find every ID in `[start_id, max(known_ids)]` absent from `known_ids`,
    /// in ascending order.
    ///
    /// IDs must be positive. An empty input has no upper bound and therefore
    /// no gaps.
    pub fn find_id_gaps(&self, known_ids: &[u64]) -> Result<Vec<u64>> {
        if let Some(pos) = known_ids.iter().position(|&id| id == 0) {
            return Err(Error::InvalidArgument(format!(
                "known id at position {} must be a positive integer, got 0",
                pos
            )));
        }

        let mut known = known_ids.to_vec();
        known.sort_unstable();
        known.dedup();

        let Some(&max) = known.last() else {
            return Ok(Vec::new());
        };
        if max < self.start_id {
            return Ok(Vec::new());
        }

        let span = max - self.start_id + 1;
        if span > self.max_span {
            return Err(Error::InvalidArgument(format!(
                "gap range {}..={} spans {} ids, more than the limit of {}",
                self.start_id, max, span, self.max_span
            )));
        }

        let mut gaps = Vec::new();
        let mut known_iter = known.iter().copied().skip_while(|&id| id < self.start_id).peekable();
        for id in self.start_id..=max {
            if known_iter.peek() == Some(&id) {
                known_iter.next();
            } else {
                gaps.push(id);
            }
        }
        Ok(gaps)
    }
}

/// Find gaps with the default detector (start at 1)
pub fn find_id_gaps(known_ids: &[u64]) -> Result<Vec<u64>> {
    GapDetector::new().find_id_gaps(known_ids)
}
