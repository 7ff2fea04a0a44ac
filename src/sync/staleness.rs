//! Staleness tracking - decides between full and incremental syncs

use std::time::Duration;
use chrono::{DateTime, Utc};
use crate::record::FormRecord;
use crate::storage::FormStore;
use crate::Result;

/// Sync metadata key holding the RFC 3339 time of the last full sync
pub const LAST_FULL_SYNC_KEY: &str = "last_full_sync";

pub struct StalenessTracker<'a> {
    store: &'a FormStore,
}

impl<'a> StalenessTracker<'a> {
    pub fn new(store: &'a FormStore) -> Self {
        Self { store }
    }

    /// True when the cache is empty or its freshest record is older than
    /// `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> Result<bool> {
        match self.store.latest_sync_time()? {
            None => Ok(true),
            Some(latest) => Ok(older_than(latest, max_age, Utc::now())),
        }
    }

    /// True when no full sync was ever recorded or the last one is more
    /// than `interval_hours` old.
    pub fn needs_full_sync(&self, interval_hours: u64) -> Result<bool> {
        let interval = Duration::from_secs(interval_hours.saturating_mul(3600));
        match self.get_last_full_sync()? {
            None => Ok(true),
            Some(last) => Ok(older_than(last, interval, Utc::now())),
        }
    }

    pub fn record_last_full_sync(&self) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        self.record_last_full_sync_at(now)?;
        Ok(now)
    }

    pub fn record_last_full_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.store.set_metadata(LAST_FULL_SYNC_KEY, &at.to_rfc3339())
    }

    /// Time of the last full sync; an unreadable value counts as never
    pub fn get_last_full_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.store.get_metadata(LAST_FULL_SYNC_KEY)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&value) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(e) => {
                tracing::warn!("Ignoring unreadable {} value {:?}: {}", LAST_FULL_SYNC_KEY, value, e);
                Ok(None)
            }
        }
    }
}

/// Whether a single record needs refreshing
pub fn is_record_stale(record: &FormRecord, max_age: Duration, now: DateTime<Utc>) -> bool {
    older_than(record.last_synced, max_age, now)
}

fn older_than(ts: DateTime<Utc>, max_age: Duration, now: DateTime<Utc>) -> bool {
    let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
    now.signed_duration_since(ts) > max_age
}
