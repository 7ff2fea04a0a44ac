//! Sync orchestrator - sequences the discovery phases into one sync

use std::collections::HashSet;
use std::time::Instant;
use chrono::Utc;
use serde_json::Value;
use crate::cancel::CancellationToken;
use crate::gaps::GapDetector;
use crate::probe::{CircuitBreaker, ProbeConfig, ProbeResult, ProbeStats, Prober};
use crate::progress::{ProgressFn, SyncPhase, SyncProgress};
use crate::record::validate_active_list;
use crate::source::{FetchActiveList, FetchById};
use crate::storage::{FormStore, UpsertOutcome};
use crate::Result;
use super::staleness::{is_record_stale, StalenessTracker};
use super::{SyncError, SyncMode, SyncOptions, SyncResult};

/// Running totals for one sync
#[derive(Debug, Default)]
struct Tally {
    discovered: usize,
    updated: usize,
    errors: Vec<String>,
}

impl Tally {
    fn absorb(&mut self, results: &[ProbeResult], stats: &ProbeStats) {
        for result in results.iter().filter(|r| r.found) {
            match result.outcome {
                Some(UpsertOutcome::Inserted) => self.discovered += 1,
                Some(UpsertOutcome::Updated) => self.updated += 1,
                None => {}
            }
        }
        // Stats already drop not-found errors
        self.errors.extend(stats.errors.iter().cloned());
    }

    fn made_progress(&self) -> bool {
        self.discovered > 0 || self.updated > 0
    }
}

pub struct SyncOrchestrator<'a> {
    store: &'a FormStore,
    probe_config: ProbeConfig,
    cancel: Option<CancellationToken>,
    progress: Option<Box<ProgressFn<'a>>>,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(store: &'a FormStore) -> Self {
        Self {
            store,
            probe_config: ProbeConfig::default(),
            cancel: None,
            progress: None,
        }
    }

    pub fn with_probe_config(mut self, config: ProbeConfig) -> Self {
        self.probe_config = config;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(&SyncProgress) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Full sync regardless of staleness
    pub fn perform_initial_sync<L, F>(&self, list: &L, fetch: &F, options: &SyncOptions) -> Result<SyncResult>
    where
        L: FetchActiveList + ?Sized,
        F: FetchById + ?Sized,
    {
        let options = SyncOptions {
            force_full: true,
            ..options.clone()
        };
        self.sync_all_forms(list, fetch, &options)
    }

    /// Incremental sync, never forcing a full refresh
    pub fn perform_incremental_sync<L, F>(&self, list: &L, fetch: &F, options: &SyncOptions) -> Result<SyncResult>
    where
        L: FetchActiveList + ?Sized,
        F: FetchById + ?Sized,
    {
        let options = SyncOptions {
            force_full: false,
            ..options.clone()
        };
        self.sync_all_forms(list, fetch, &options)
    }

    /// Full sync when the last one is older than `full_sync_interval_hours`
    /// (or never happened), incremental otherwise
    pub fn perform_hybrid_sync<L, F>(
        &self,
        list: &L,
        fetch: &F,
        full_sync_interval_hours: u64,
        options: &SyncOptions,
    ) -> Result<SyncResult>
    where
        L: FetchActiveList + ?Sized,
        F: FetchById + ?Sized,
    {
        if StalenessTracker::new(self.store).needs_full_sync(full_sync_interval_hours)? {
            tracing::info!("Last full sync older than {}h, running full sync", full_sync_interval_hours);
            self.perform_initial_sync(list, fetch, options)
        } else {
            self.perform_incremental_sync(list, fetch, options)
        }
    }

    /// Run one sync: fetch-active, probe-gaps, probe-beyond-max, completion.
    ///
    /// Partial progress returns `Ok` with the collected errors; a sync
    /// that changed nothing and hit an error returns [`crate::Error::Sync`].
    pub fn sync_all_forms<L, F>(&self, list: &L, fetch: &F, options: &SyncOptions) -> Result<SyncResult>
    where
        L: FetchActiveList + ?Sized,
        F: FetchById + ?Sized,
    {
        options.validate()?;
        let started = Instant::now();
        let mode = options.mode();
        tracing::info!("Starting {} form sync", mode);

        let mut tally = Tally::default();
        let mut prober = Prober::with_config(self.store, self.probe_config);
        if let Some(token) = &self.cancel {
            prober = prober.with_cancellation(token.clone());
        }

        // Phase 1: mirror the listing endpoint
        self.report(SyncProgress::Started { phase: SyncPhase::FetchActive, total: None });
        let active_ids = match self.fetch_active(list, options, &mut tally) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Sync aborted while fetching active forms: {}", e);
                tally.errors.push(e.to_string());
                return Err(SyncError::new(format!("fetching active forms failed: {}", e), tally.errors).into());
            }
        };
        self.report(SyncProgress::Finished { phase: SyncPhase::FetchActive });
        tracing::info!("Fetched {} active forms", active_ids.len());

        // Phase 2: fill the gaps below the highest active ID
        let mut gap_stats = ProbeStats::default();
        if options.probe_gaps && !self.is_cancelled() {
            let gaps = self.gap_candidates(&active_ids, options, &mut tally)?;
            self.report(SyncProgress::Started { phase: SyncPhase::ProbeGaps, total: Some(gaps.len()) });
            if !gaps.is_empty() {
                tracing::info!("Probing {} gap ids", gaps.len());
                let mut breaker = CircuitBreaker::with_threshold(options.circuit_threshold);
                let results = prober.probe_batch(
                    &gaps,
                    fetch,
                    &mut breaker,
                    options.circuit_threshold,
                    SyncPhase::ProbeGaps,
                    self.progress.as_deref(),
                )?;
                gap_stats = prober.stats().clone();
                tally.absorb(&results, &gap_stats);
            }
            self.report(SyncProgress::Finished { phase: SyncPhase::ProbeGaps });
        }

        // Phase 3: scan past the highest active ID
        let mut beyond_max_stats = ProbeStats::default();
        if options.probe_beyond_max && !self.is_cancelled() {
            let start_id = active_ids.iter().max().map_or(1, |max| max.saturating_add(1));
            self.report(SyncProgress::Started { phase: SyncPhase::ProbeBeyondMax, total: None });
            tracing::info!("Scanning beyond max from id {}", start_id);
            let results = prober.probe_beyond_max(
                start_id,
                fetch,
                &options.beyond_max,
                self.progress.as_deref(),
            )?;
            beyond_max_stats = prober.stats().clone();
            tally.absorb(&results, &beyond_max_stats);
            self.report(SyncProgress::Finished { phase: SyncPhase::ProbeBeyondMax });
        }

        let cancelled = self.is_cancelled();
        if cancelled {
            tally.errors.push("sync cancelled before completion".to_string());
        }

        if !tally.made_progress() && !tally.errors.is_empty() {
            tracing::error!("Sync made no progress ({} errors)", tally.errors.len());
            return Err(SyncError::new("no forms were discovered or updated", tally.errors).into());
        }

        // Phase 4: completion
        self.report(SyncProgress::Started { phase: SyncPhase::Completion, total: None });
        let last_sync_time = if mode == SyncMode::Full && !cancelled {
            StalenessTracker::new(self.store).record_last_full_sync()?
        } else {
            Utc::now()
        };
        self.report(SyncProgress::Finished { phase: SyncPhase::Completion });

        let result = SyncResult {
            mode,
            discovered: tally.discovered,
            updated: tally.updated,
            errors: tally.errors,
            duration_ms: started.elapsed().as_millis() as u64,
            last_sync_time,
            gap_stats,
            beyond_max_stats,
        };
        tracing::info!(
            "Finished {} sync: {} discovered, {} updated, {} errors in {}ms",
            result.mode,
            result.discovered,
            result.updated,
            result.errors.len(),
            result.duration_ms
        );
        Ok(result)
    }

    /// Fetch, validate and cache the active list; returns the active IDs.
    /// A repeated ID is written once, from its first entry.
    fn fetch_active<L: FetchActiveList + ?Sized>(
        &self,
        list: &L,
        options: &SyncOptions,
        tally: &mut Tally,
    ) -> Result<Vec<u64>> {
        let raw = list.fetch_active_list()?;
        let payloads = validate_active_list(&raw)?;
        let entries = raw.as_array().map(Vec::as_slice).unwrap_or_default();

        let now = Utc::now();
        let mut seen = HashSet::with_capacity(payloads.len());
        let mut ids = Vec::with_capacity(payloads.len());
        for (payload, entry) in payloads.into_iter().zip(entries) {
            let id = payload.id;
            if !seen.insert(id) {
                tracing::debug!("Active list repeats form {}, ignoring the duplicate", id);
                continue;
            }
            ids.push(id);

            let written = self.store.get_record(id).and_then(|existing| {
                let needs_write = match &existing {
                    None => true,
                    Some(record) => options.force_full || is_record_stale(record, options.max_cache_age, now),
                };
                if needs_write {
                    self.store.upsert(&payload.into_record(Value::clone(entry), now)).map(Some)
                } else {
                    Ok(None)
                }
            });
            match written {
                Ok(Some(UpsertOutcome::Inserted)) => tally.discovered += 1,
                Ok(Some(UpsertOutcome::Updated)) => tally.updated += 1,
                Ok(None) => {}
                Err(e) if e.is_corruption() => return Err(e),
                Err(e) => {
                    tracing::warn!("Failed to cache active form {}: {}", id, e);
                    tally.errors.push(format!("Form {}: failed to cache: {}", id, e));
                }
            }
        }
        Ok(ids)
    }

    /// Gap IDs worth probing. Incremental syncs skip gaps already cached
    /// and still fresh.
    fn gap_candidates(&self, active_ids: &[u64], options: &SyncOptions, tally: &mut Tally) -> Result<Vec<u64>> {
        // 0 is a valid form id but lies below every gap range
        let known: Vec<u64> = active_ids.iter().copied().filter(|&id| id > 0).collect();
        let gaps = match GapDetector::new().with_start_id(options.gap_start_id).find_id_gaps(&known) {
            Ok(gaps) => gaps,
            Err(e) => {
                tracing::warn!("Skipping gap probing: {}", e);
                tally.errors.push(format!("gap detection failed: {}", e));
                return Ok(Vec::new());
            }
        };
        if options.force_full {
            return Ok(gaps);
        }

        let now = Utc::now();
        let mut candidates = Vec::with_capacity(gaps.len());
        for id in gaps {
            match self.store.get_record(id)? {
                Some(record) if !is_record_stale(&record, options.max_cache_age, now) => {}
                _ => candidates.push(id),
            }
        }
        Ok(candidates)
    }

    fn report(&self, event: SyncProgress) {
        if let Some(progress) = &self.progress {
            progress(&event);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::BeyondMaxOptions;
    use crate::source::FetchError;
    use crate::Error;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// In-memory remote: an active listing plus hidden forms reachable by ID
    struct FakeCatalog {
        active: Vec<u64>,
        hidden: HashMap<u64, &'static str>,
        failing: HashMap<u64, u16>,
        probed: RefCell<Vec<u64>>,
    }

    impl FakeCatalog {
        fn new(active: &[u64]) -> Self {
            Self {
                active: active.to_vec(),
                hidden: HashMap::new(),
                failing: HashMap::new(),
                probed: RefCell::new(Vec::new()),
            }
        }

        fn hidden(mut self, id: u64, status: &'static str) -> Self {
            self.hidden.insert(id, status);
            self
        }

        fn failing(mut self, id: u64, status: u16) -> Self {
            self.failing.insert(id, status);
            self
        }

        fn probed(&self) -> Vec<u64> {
            self.probed.borrow().clone()
        }
    }

    impl FetchActiveList for FakeCatalog {
        fn fetch_active_list(&self) -> std::result::Result<Value, FetchError> {
            Ok(Value::Array(
                self.active
                    .iter()
                    .map(|id| json!({ "id": id.to_string(), "title": format!("Active {}", id), "status": "ENABLED", "count": "3" }))
                    .collect(),
            ))
        }
    }

    impl FetchById for FakeCatalog {
        fn fetch_by_id(&self, id: u64) -> std::result::Result<Value, FetchError> {
            self.probed.borrow_mut().push(id);
            if let Some(&status) = self.failing.get(&id) {
                return Err(FetchError::status(status, "server error"));
            }
            if self.active.contains(&id) {
                return Ok(json!({ "id": id, "title": format!("Active {}", id), "status": "ENABLED" }));
            }
            match self.hidden.get(&id) {
                Some(status) => Ok(json!({ "id": id, "title": format!("Hidden {}", id), "status": status })),
                None => Err(FetchError::not_found(id)),
            }
        }
    }

    fn options() -> SyncOptions {
        SyncOptions {
            beyond_max: BeyondMaxOptions {
                max_probes: 20,
                max_consecutive_failures: 3,
            },
            ..SyncOptions::default()
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn orchestrator(store: &FormStore) -> SyncOrchestrator<'_> {
        SyncOrchestrator::new(store).with_probe_config(ProbeConfig::immediate())
    }

    #[test]
    fn test_end_to_end_sync() {
        init_tracing();
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[1, 3, 5]);

        let result = orchestrator(&store).sync_all_forms(&catalog, &catalog, &options()).unwrap();

        assert_eq!(result.discovered, 3);
        assert_eq!(result.updated, 0);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(store.all_ids().unwrap(), vec![1, 3, 5]);
        assert_eq!(store.get_record(3).unwrap().unwrap().entry_count, 3);

        // Gaps first, then beyond max from 6 until three misses in a row
        assert_eq!(catalog.probed(), vec![2, 4, 6, 7, 8]);
        assert_eq!(result.gap_stats.failed, 2);
        assert_eq!(result.beyond_max_stats.attempted, 3);
    }

    #[test]
    fn test_discovers_hidden_forms() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[2, 5])
            .hidden(3, "DELETED")
            .hidden(4, "DISABLED")
            .hidden(7, "DELETED");

        let result = orchestrator(&store).perform_initial_sync(&catalog, &catalog, &options()).unwrap();

        assert_eq!(result.discovered, 5);
        assert_eq!(store.all_ids().unwrap(), vec![2, 3, 4, 5, 7]);
        assert!(store.get_record(3).unwrap().unwrap().is_trash);
        assert!(!store.get_record(4).unwrap().unwrap().is_active);
        assert_eq!(store.count(true).unwrap(), 2);

        // 6 missed, 7 found and reset the counter, then 8, 9, 10
        assert_eq!(catalog.probed(), vec![1, 3, 4, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_no_active_forms_scans_from_one() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[]).hidden(1, "DELETED");

        let result = orchestrator(&store).sync_all_forms(&catalog, &catalog, &options()).unwrap();
        assert_eq!(result.discovered, 1);
        assert_eq!(catalog.probed(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_partial_progress_reports_errors() {
        init_tracing();
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[1, 3]).failing(2, 503);

        let result = orchestrator(&store).sync_all_forms(&catalog, &catalog, &options()).unwrap();
        assert_eq!(result.discovered, 2);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("503"));
    }

    #[test]
    fn test_zero_progress_with_errors_is_sync_error() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[]).failing(1, 500);

        let err = orchestrator(&store).sync_all_forms(&catalog, &catalog, &options()).unwrap_err();
        match err {
            Error::Sync(sync) => assert!(sync.errors.iter().any(|e| e.contains("500"))),
            other => panic!("expected sync error, got {}", other),
        }
    }

    #[test]
    fn test_invalid_active_list_aborts() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[]);
        let not_a_list = || -> std::result::Result<Value, FetchError> { Ok(json!({ "content": "nope" })) };

        let err = orchestrator(&store).sync_all_forms(&not_a_list, &catalog, &options()).unwrap_err();
        assert!(matches!(err, Error::Sync(_)));
        assert!(catalog.probed().is_empty());
    }

    #[test]
    fn test_list_transport_failure_aborts() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[]);
        let down = || -> std::result::Result<Value, FetchError> { Err(FetchError::Timeout("list".into())) };

        let err = orchestrator(&store).sync_all_forms(&down, &catalog, &options()).unwrap_err();
        assert!(matches!(err, Error::Sync(_)));
    }

    #[test]
    fn test_incremental_skips_fresh_records() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[1, 3]).hidden(2, "DISABLED");
        let orchestrator = orchestrator(&store);

        let first = orchestrator.perform_initial_sync(&catalog, &catalog, &options()).unwrap();
        assert_eq!(first.discovered, 3);
        catalog.probed.borrow_mut().clear();

        let second = orchestrator.perform_incremental_sync(&catalog, &catalog, &options()).unwrap();
        assert_eq!(second.discovered, 0);
        assert_eq!(second.updated, 0);
        assert!(second.errors.is_empty());
        // Gap 2 is cached and fresh, so only the beyond-max scan probes
        assert_eq!(catalog.probed(), vec![4, 5, 6]);
    }

    #[test]
    fn test_incremental_refreshes_stale_records() {
        let store = FormStore::open_in_memory().unwrap();
        let mut old = crate::record::FormRecord::new(1, "Old title");
        old.last_synced = Utc::now() - ChronoDuration::hours(48);
        store.upsert(&old).unwrap();

        let catalog = FakeCatalog::new(&[1]);
        let result = orchestrator(&store).perform_incremental_sync(&catalog, &catalog, &options()).unwrap();

        assert_eq!(result.updated, 1);
        assert_eq!(store.get_record(1).unwrap().unwrap().title, "Active 1");
    }

    #[test]
    fn test_full_sync_records_timestamp() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[1]);
        let tracker = StalenessTracker::new(&store);

        orchestrator(&store).perform_incremental_sync(&catalog, &catalog, &options()).unwrap();
        assert!(tracker.get_last_full_sync().unwrap().is_none());

        let result = orchestrator(&store).perform_initial_sync(&catalog, &catalog, &options()).unwrap();
        assert_eq!(tracker.get_last_full_sync().unwrap(), Some(result.last_sync_time));
    }

    #[test]
    fn test_hybrid_sync_decision() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[1]);
        let tracker = StalenessTracker::new(&store);

        let first = orchestrator(&store).perform_hybrid_sync(&catalog, &catalog, 24, &options()).unwrap();
        assert_eq!(first.mode, SyncMode::Full);

        tracker.record_last_full_sync_at(Utc::now() - ChronoDuration::hours(1)).unwrap();
        let second = orchestrator(&store).perform_hybrid_sync(&catalog, &catalog, 24, &options()).unwrap();
        assert_eq!(second.mode, SyncMode::Incremental);

        tracker.record_last_full_sync_at(Utc::now() - ChronoDuration::hours(30)).unwrap();
        let third = orchestrator(&store).perform_hybrid_sync(&catalog, &catalog, 24, &options()).unwrap();
        assert_eq!(third.mode, SyncMode::Full);
    }

    #[test]
    fn test_progress_phases_in_order() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[2]);
        let events = RefCell::new(Vec::new());

        orchestrator(&store)
            .with_progress(|p: &SyncProgress| events.borrow_mut().push(p.clone()))
            .sync_all_forms(&catalog, &catalog, &options())
            .unwrap();

        let events = events.into_inner();
        let started: Vec<SyncPhase> = events
            .iter()
            .filter(|e| matches!(e, SyncProgress::Started { .. }))
            .map(SyncProgress::phase)
            .collect();
        assert_eq!(
            started,
            vec![SyncPhase::FetchActive, SyncPhase::ProbeGaps, SyncPhase::ProbeBeyondMax, SyncPhase::Completion]
        );
        assert!(events.contains(&SyncProgress::Probe {
            phase: SyncPhase::ProbeGaps,
            current_id: 1,
            found_so_far: 0,
        }));
    }

    #[test]
    fn test_cancellation_stops_between_phases() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[1, 3]);
        let token = CancellationToken::new();
        let cancel_after_list = || -> std::result::Result<Value, FetchError> {
            let list = catalog.fetch_active_list();
            token.cancel();
            list
        };

        let result = orchestrator(&store)
            .with_cancellation(token.clone())
            .perform_initial_sync(&cancel_after_list, &catalog, &options())
            .unwrap();

        assert_eq!(result.discovered, 2);
        assert!(catalog.probed().is_empty());
        assert!(result.errors.iter().any(|e| e.contains("cancelled")));
        assert!(StalenessTracker::new(&store).get_last_full_sync().unwrap().is_none());
    }

    #[test]
    fn test_unwritable_active_form_is_recorded_and_sync_continues() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[1, 2]);
        let list = || -> std::result::Result<Value, FetchError> {
            Ok(json!([
                { "id": "1", "title": "Fine" },
                { "id": "2", "title": "Huge", "count": u64::MAX.to_string() },
            ]))
        };

        let result = orchestrator(&store).perform_initial_sync(&list, &catalog, &options()).unwrap();

        assert_eq!(result.discovered, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Form 2: failed to cache"), "{:?}", result.errors);
        assert_eq!(store.all_ids().unwrap(), vec![1]);
        // The remaining phases still ran
        assert_eq!(catalog.probed(), vec![3, 4, 5]);
    }

    #[test]
    fn test_corrupted_store_aborts_during_fetch_active() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.db");
        let store = FormStore::open(&path).unwrap();
        std::fs::write(&path, "not an sqlite database\n".repeat(200)).unwrap();
        let catalog = FakeCatalog::new(&[1, 3]);

        let err = orchestrator(&store).perform_initial_sync(&catalog, &catalog, &options()).unwrap_err();
        match err {
            Error::Sync(sync) => assert!(
                sync.errors.iter().any(|e| e.contains("corruption")),
                "{:?}",
                sync.errors
            ),
            other => panic!("expected sync error, got {}", other),
        }
        assert!(catalog.probed().is_empty());
    }

    #[test]
    fn test_phase_switches() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[1, 3]).hidden(2, "DELETED").hidden(4, "DELETED");

        let list_only = SyncOptions {
            probe_gaps: false,
            probe_beyond_max: false,
            ..options()
        };
        let result = orchestrator(&store).sync_all_forms(&catalog, &catalog, &list_only).unwrap();
        assert_eq!(result.discovered, 2);
        assert!(catalog.probed().is_empty());
        assert_eq!(result.gap_stats, ProbeStats::default());
        assert_eq!(result.beyond_max_stats, ProbeStats::default());

        let beyond_only = SyncOptions {
            probe_gaps: false,
            ..options()
        };
        let result = orchestrator(&store).perform_initial_sync(&catalog, &catalog, &beyond_only).unwrap();
        assert_eq!(catalog.probed(), vec![4, 5, 6, 7]);
        assert_eq!(result.beyond_max_stats.found, 1);
        assert_eq!(result.gap_stats.attempted, 0);
        assert!(store.get_record(2).unwrap().is_none());
    }

    #[test]
    fn test_repeated_active_id_counted_once() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[1]);
        let list = || -> std::result::Result<Value, FetchError> {
            Ok(json!([
                { "id": "1", "title": "First" },
                { "id": 1, "title": "Repeat" },
            ]))
        };

        let result = orchestrator(&store).perform_initial_sync(&list, &catalog, &options()).unwrap();
        assert_eq!(result.discovered, 1);
        assert_eq!(result.updated, 0);
        assert_eq!(store.get_record(1).unwrap().unwrap().title, "First");
    }

    #[test]
    fn test_invalid_options_rejected() {
        let store = FormStore::open_in_memory().unwrap();
        let catalog = FakeCatalog::new(&[1]);
        let options = SyncOptions {
            circuit_threshold: 0,
            ..options()
        };

        let err = orchestrator(&store).sync_all_forms(&catalog, &catalog, &options).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
