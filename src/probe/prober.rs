//! Prober - single, batched, retried and beyond-max lookups
//!
//! All probing is sequential: one request in flight, with a fixed pause
//! between requests so the remote rate limiter stays happy.

use std::thread;
use std::time::Duration;
use chrono::Utc;
use crate::cancel::CancellationToken;
use crate::progress::{ProgressFn, SyncPhase, SyncProgress};
use crate::record::FormPayload;
use crate::source::FetchById;
use crate::storage::FormStore;
use crate::{Error, Result};
use super::breaker::CircuitBreaker;
use super::retry::{RetryPolicy, MAX_RETRIES_CEILING};
use super::{ProbeError, ProbeResult, ProbeStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Pause between consecutive requests
    pub request_delay: Duration,
    pub retry: RetryPolicy,
    /// Retries used by [`Prober::probe_with_default_retry`]
    pub max_retries: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(100),
            retry: RetryPolicy::default(),
            max_retries: 3,
        }
    }
}

impl ProbeConfig {
    /// No pauses and no backoff (for tests and local sources)
    pub fn immediate() -> Self {
        Self {
            request_delay: Duration::ZERO,
            retry: RetryPolicy::immediate(),
            ..Self::default()
        }
    }
}

/// Bounds for scanning upward past the highest known ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeyondMaxOptions {
    /// Hard cap on requests issued by one scan
    pub max_probes: u32,
    /// Stop after this many misses in a row
    pub max_consecutive_failures: u32,
}

impl Default for BeyondMaxOptions {
    fn default() -> Self {
        Self {
            max_probes: 50,
            max_consecutive_failures: 10,
        }
    }
}

impl BeyondMaxOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_probes == 0 {
            return Err(Error::Configuration("max_probes must be at least 1".to_string()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::Configuration(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Looks up individual form IDs and caches whatever it finds.
pub struct Prober<'a> {
    store: &'a FormStore,
    config: ProbeConfig,
    stats: ProbeStats,
    cancel: Option<CancellationToken>,
}

impl<'a> Prober<'a> {
    pub fn new(store: &'a FormStore) -> Self {
        Self::with_config(store, ProbeConfig::default())
    }

    pub fn with_config(store: &'a FormStore, config: ProbeConfig) -> Self {
        Self {
            store,
            config,
            stats: ProbeStats::default(),
            cancel: None,
        }
    }

    /// Check `token` at the top of every batch/scan iteration
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Stats of the most recent batch or scan
    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    /// Fetch one form and cache it.
    ///
    /// Failures (remote errors, malformed payloads, storage errors) come
    /// back as a failed result; nothing is written in that case.
    pub fn probe_one<F: FetchById + ?Sized>(&self, id: u64, fetch: &F) -> ProbeResult {
        let raw = match fetch.fetch_by_id(id) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("Probe {} failed: {}", id, e);
                return ProbeResult::failed(id, ProbeError::from_fetch(id, &e));
            }
        };

        let payload = match FormPayload::validate(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!("Probe {} returned a malformed form: {}", id, e);
                return ProbeResult::failed(id, ProbeError::validation(id, e));
            }
        };
        if payload.id != id {
            return ProbeResult::failed(
                id,
                ProbeError::validation(id, format!("response describes form {}", payload.id)),
            );
        }

        let record = payload.into_record(raw, Utc::now());
        match self.store.upsert(&record) {
            Ok(outcome) => {
                tracing::debug!("Probe {} found {:?} ({:?})", id, record.title, outcome);
                ProbeResult::found(record, outcome)
            }
            Err(e) => {
                tracing::warn!("Failed to cache form {}: {}", id, e);
                ProbeResult::failed(id, ProbeError::storage(id, e))
            }
        }
    }

    /// Probe `ids` in order, pausing between requests.
    ///
    /// Before each request the breaker's consecutive-failure counter is
    /// compared with `circuit_threshold`; once reached, every remaining ID
    /// is reported as a "circuit breaker open" failure without any request.
    /// Not-found results count as failures for the breaker. Once the
    /// cancellation token fires, the remaining IDs come back as
    /// `Cancelled` failures. Progress events are tagged with `phase`.
    pub fn probe_batch<F: FetchById + ?Sized>(
        &mut self,
        ids: &[u64],
        fetch: &F,
        breaker: &mut CircuitBreaker,
        circuit_threshold: u32,
        phase: SyncPhase,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<Vec<ProbeResult>> {
        if circuit_threshold == 0 {
            return Err(Error::Configuration(
                "circuit threshold must be at least 1".to_string(),
            ));
        }

        self.stats = ProbeStats::default();
        let mut results = Vec::with_capacity(ids.len());
        let mut found_so_far = 0;

        for (i, &id) in ids.iter().enumerate() {
            if self.is_cancelled() {
                tracing::info!("Batch probe cancelled after {} of {} ids", i, ids.len());
                self.skip_remaining(&ids[i..], &mut results, ProbeError::cancelled);
                break;
            }

            if breaker.consecutive_failures() >= circuit_threshold {
                tracing::warn!(
                    "Circuit breaker open after {} consecutive failures, skipping {} ids",
                    breaker.consecutive_failures(),
                    ids.len() - i
                );
                self.skip_remaining(&ids[i..], &mut results, ProbeError::circuit_open);
                break;
            }

            if i > 0 {
                self.pause();
            }

            let result = self.probe_one(id, fetch);
            if result.found {
                breaker.record_success();
                found_so_far += 1;
            } else {
                breaker.record_failure();
            }
            self.stats.record(&result);
            results.push(result);

            if let Some(report) = progress {
                report(&SyncProgress::Probe {
                    phase,
                    current_id: id,
                    found_so_far,
                });
            }
        }

        tracing::debug!("Batch probe: {}", self.stats);
        Ok(results)
    }

    /// Probe one ID, retrying retryable failures with exponential backoff.
    ///
    /// A not-found answer returns immediately without consuming retries.
    pub fn probe_with_retry<F: FetchById + ?Sized>(
        &self,
        id: u64,
        fetch: &F,
        max_retries: u32,
    ) -> Result<ProbeResult> {
        if max_retries > MAX_RETRIES_CEILING {
            return Err(Error::Configuration(format!(
                "max_retries {} exceeds the ceiling of {}",
                max_retries, MAX_RETRIES_CEILING
            )));
        }

        let mut attempt = 0;
        loop {
            let result = self.probe_one(id, fetch);
            let retryable = result.error.as_ref().is_some_and(|e| e.is_retryable());
            if !retryable || attempt >= max_retries || self.is_cancelled() {
                return Ok(result);
            }

            let delay = self.config.retry.jittered_delay(attempt);
            tracing::warn!(
                "Probe {} failed (attempt {}/{}), retrying in {:?}",
                id,
                attempt + 1,
                max_retries + 1,
                delay
            );
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            attempt += 1;
        }
    }

    /// [`Prober::probe_with_retry`] with the configured `max_retries`
    pub fn probe_with_default_retry<F: FetchById + ?Sized>(&self, id: u64, fetch: &F) -> Result<ProbeResult> {
        self.probe_with_retry(id, fetch, self.config.max_retries)
    }

    /// Scan upward from `start_id` until `max_probes` requests were made or
    /// `max_consecutive_failures` misses happened in a row.
    ///
    /// This finds inactive and trashed forms created after the newest
    /// active one. The miss counter is local to the scan; every found form
    /// resets it.
    pub fn probe_beyond_max<F: FetchById + ?Sized>(
        &mut self,
        start_id: u64,
        fetch: &F,
        options: &BeyondMaxOptions,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<Vec<ProbeResult>> {
        options.validate()?;

        self.stats = ProbeStats::default();
        let mut results = Vec::new();
        let mut consecutive_failures = 0;
        let mut found_so_far = 0;

        for offset in 0..options.max_probes {
            let Some(id) = start_id.checked_add(u64::from(offset)) else {
                break;
            };
            if self.is_cancelled() {
                tracing::info!("Beyond-max scan cancelled at id {}", id);
                break;
            }
            if offset > 0 {
                self.pause();
            }

            let result = self.probe_one(id, fetch);
            if result.found {
                consecutive_failures = 0;
                found_so_far += 1;
            } else {
                consecutive_failures += 1;
            }
            self.stats.record(&result);
            results.push(result);

            if let Some(report) = progress {
                report(&SyncProgress::Probe {
                    phase: SyncPhase::ProbeBeyondMax,
                    current_id: id,
                    found_so_far,
                });
            }

            if consecutive_failures >= options.max_consecutive_failures {
                tracing::debug!(
                    "Beyond-max scan stopping at id {} after {} consecutive misses",
                    id,
                    consecutive_failures
                );
                break;
            }
        }

        tracing::debug!("Beyond-max scan from {}: {}", start_id, self.stats);
        Ok(results)
    }

    fn skip_remaining(&mut self, ids: &[u64], results: &mut Vec<ProbeResult>, error: fn(u64) -> ProbeError) {
        for &id in ids {
            let result = ProbeResult::failed(id, error(id));
            self.stats.record(&result);
            results.push(result);
        }
    }

    fn pause(&self) {
        if !self.config.request_delay.is_zero() {
            thread::sleep(self.config.request_delay);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}
