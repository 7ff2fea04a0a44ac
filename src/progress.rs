//! Sync progress events

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    FetchActive,
    ProbeGaps,
    ProbeBeyondMax,
    Completion,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::FetchActive => "fetch-active",
            SyncPhase::ProbeGaps => "probe-gaps",
            SyncPhase::ProbeBeyondMax => "probe-beyond-max",
            SyncPhase::Completion => "completion",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncProgress {
    Started {
        phase: SyncPhase,
        /// Known amount of work, if any (beyond-max scans have none)
        total: Option<usize>,
    },
    Probe {
        phase: SyncPhase,
        current_id: u64,
        found_so_far: usize,
    },
    Finished {
        phase: SyncPhase,
    },
}

impl SyncProgress {
    pub fn phase(&self) -> SyncPhase {
        match self {
            SyncProgress::Started { phase, .. }
            | SyncProgress::Probe { phase, .. }
            | SyncProgress::Finished { phase } => *phase,
        }
    }
}

/// Callback receiving progress events
pub type ProgressFn<'a> = dyn Fn(&SyncProgress) + 'a;
