//! SQLite storage implementation

use std::fmt;
use std::path::Path;
use std::time::Duration;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use crate::record::FormRecord;
use crate::{Error, Result};
use super::schema::{self, Migration, MigrationStep, CURRENT_SCHEMA_VERSION};

const SELECT_FORM_COLUMNS: &str =
    "SELECT id, title, entry_count, is_active, is_trash, last_synced, raw_data FROM forms";

/// Classification of storage failures, so callers can decide whether to
/// retry, skip the record, or rebuild the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Constraint violation (unique, not null, check)
    Constraint,
    /// The database file is damaged or is not a database at all
    Corruption,
    /// Read-only file, missing permissions, unopenable path
    Permission,
    /// Another connection holds the lock
    Busy,
    Other,
}

impl StorageErrorKind {
    pub fn classify(err: &rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::ConstraintViolation => StorageErrorKind::Constraint,
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => StorageErrorKind::Corruption,
                ErrorCode::PermissionDenied | ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                    StorageErrorKind::Permission
                }
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StorageErrorKind::Busy,
                _ => StorageErrorKind::Other,
            },
            // A row that no longer decodes means the stored data is damaged
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => StorageErrorKind::Corruption,
            _ => StorageErrorKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageErrorKind::Constraint => "constraint",
            StorageErrorKind::Corruption => "corruption",
            StorageErrorKind::Permission => "permission",
            StorageErrorKind::Busy => "busy",
            StorageErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an upsert did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// SQLite-backed storage for the form cache
pub struct FormStore {
    conn: Connection,
}

impl FormStore {
    /// Open a database file (creates if doesn't exist) and migrate it
    pub fn open(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(Error::Configuration("database path is empty".to_string()));
        }
        if path.is_dir() {
            return Err(Error::Configuration(format!(
                "database path {} is a directory",
                path.display()
            )));
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self { conn };
        store.initialize_schema()?;
        tracing::debug!("Opened form cache at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Close the underlying connection, surfacing any error on flush
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }

    /// Whether the store is reachable and fully migrated
    pub fn is_ready(&self) -> bool {
        matches!(self.schema_version(), Ok(v) if v == CURRENT_SCHEMA_VERSION)
    }

    /// Create the schema if absent and run pending migrations
    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute(schema::CREATE_SCHEMA_VERSION_TABLE, [])?;

        let current = self.schema_version()?;
        if current > CURRENT_SCHEMA_VERSION {
            return Err(Error::Configuration(format!(
                "cache schema version {} is newer than supported version {}",
                current, CURRENT_SCHEMA_VERSION
            )));
        }

        for migration in schema::pending_migrations(current) {
            self.apply_migration(migration)?;
        }

        for stmt in schema::CREATE_INDEXES {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    fn apply_migration(&self, migration: &Migration) -> Result<()> {
        tracing::info!(
            "Applying cache migration v{}: {}",
            migration.version,
            migration.description
        );

        let tx = self.conn.unchecked_transaction()?;
        for step in migration.steps {
            match *step {
                MigrationStep::AddColumn { table, column, definition } => {
                    if self.column_exists(table, column)? {
                        tracing::debug!("Column {}.{} already present, skipping", table, column);
                        continue;
                    }
                    tx.execute(
                        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
                        [],
                    )?;
                }
                MigrationStep::Execute(sql) => {
                    tx.execute(sql, [])?;
                }
            }
        }
        tx.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names.iter().any(|name| name == column))
    }

    /// Highest applied schema version (0 for a fresh store)
    pub fn schema_version(&self) -> Result<i64> {
        let version = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    // ========== Form Operations ==========

    /// Get a form by ID
    pub fn get_record(&self, id: u64) -> Result<Option<FormRecord>> {
        let sql_id = to_sql_id(id)?;
        self.conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_FORM_COLUMNS),
                [sql_id],
                row_to_record,
            )
            .optional()
            .map_err(Into::into)
    }

    /// All cached forms ordered by ID, optionally restricted to active
    /// and/or non-trashed ones
    pub fn get_all_records(&self, active_only: bool, exclude_trash: bool) -> Result<Vec<FormRecord>> {
        let mut conditions = Vec::new();
        if active_only {
            conditions.push("is_active = 1");
        }
        if exclude_trash {
            conditions.push("is_trash = 0");
        }

        let mut sql = SELECT_FORM_COLUMNS.to_string();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Insert a new form or update an existing one.
    ///
    /// `last_synced` never moves backwards: an update carrying an older
    /// timestamp keeps the stored one.
    pub fn upsert(&self, record: &FormRecord) -> Result<UpsertOutcome> {
        let sql_id = to_sql_id(record.id)?;
        let entry_count = i64::try_from(record.entry_count).map_err(|_| {
            Error::InvalidArgument(format!("entry count {} out of range", record.entry_count))
        })?;
        let raw_data = serde_json::to_string(&record.raw_data)?;

        let existed: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM forms WHERE id = ?1)",
            [sql_id],
            |row| row.get(0),
        )?;

        self.conn.execute(
            r#"
            INSERT INTO forms (id, title, entry_count, is_active, is_trash, last_synced, raw_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                entry_count = excluded.entry_count,
                is_active = excluded.is_active,
                is_trash = excluded.is_trash,
                last_synced = MAX(forms.last_synced, excluded.last_synced),
                raw_data = excluded.raw_data
            "#,
            params![
                sql_id,
                record.title,
                entry_count,
                record.is_active,
                record.is_trash,
                record.last_synced.timestamp_millis(),
                raw_data,
            ],
        )?;

        Ok(if existed { UpsertOutcome::Updated } else { UpsertOutcome::Inserted })
    }

    /// Delete a form by ID, returning whether it existed
    pub fn delete_record(&self, id: u64) -> Result<bool> {
        let sql_id = to_sql_id(id)?;
        let deleted = self.conn.execute("DELETE FROM forms WHERE id = ?1", [sql_id])?;
        Ok(deleted > 0)
    }

    /// Count cached forms
    pub fn count(&self, active_only: bool) -> Result<usize> {
        let sql = if active_only {
            "SELECT COUNT(*) FROM forms WHERE is_active = 1"
        } else {
            "SELECT COUNT(*) FROM forms"
        };
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Highest cached form ID
    pub fn max_id(&self) -> Result<Option<u64>> {
        let max: Option<i64> = self.conn.query_row("SELECT MAX(id) FROM forms", [], |row| row.get(0))?;
        Ok(max.map(|id| id as u64))
    }

    /// All cached form IDs in ascending order
    pub fn all_ids(&self) -> Result<Vec<u64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM forms ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(|id| id as u64))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Most recent `last_synced` across all forms
    pub fn latest_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let millis: Option<i64> =
            self.conn.query_row("SELECT MAX(last_synced) FROM forms", [], |row| row.get(0))?;
        Ok(millis.and_then(DateTime::from_timestamp_millis))
    }

    // ========== Sync Metadata ==========

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM sync_metadata WHERE key = ?1", [key], |row| row.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete_metadata(&self, key: &str) -> Result<()> {
        self.conn.execute("DELETE FROM sync_metadata WHERE key = ?1", [key])?;
        Ok(())
    }

    // ========== Bulk Operations ==========

    /// Invalidate the whole cache: all forms and all sync bookkeeping
    pub fn clear_all(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM forms", [])?;
        tx.execute("DELETE FROM sync_metadata", [])?;
        tx.commit()?;
        tracing::info!("Form cache invalidated");
        Ok(())
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats> {
        let (total, active, trashed): (i64, i64, i64) = self.conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(is_active), 0),
                   COALESCE(SUM(is_trash), 0)
            FROM forms
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(CacheStats {
            total: total as usize,
            active: active as usize,
            trashed: trashed as usize,
            max_id: self.max_id()?,
            latest_sync: self.latest_sync_time()?,
            schema_version: self.schema_version()?,
        })
    }
}

fn to_sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| Error::InvalidArgument(format!("form id {} out of range", id)))
}

/// Helper to convert a row to a FormRecord
fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<FormRecord> {
    let id: i64 = row.get(0)?;
    let entry_count: i64 = row.get(2)?;
    let millis: i64 = row.get(5)?;
    let raw: String = row.get(6)?;

    let last_synced = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(5, millis)
    })?;
    let raw_data = serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(FormRecord {
        id: id as u64,
        title: row.get(1)?,
        entry_count: entry_count.max(0) as u64,
        is_active: row.get(3)?,
        is_trash: row.get(4)?,
        last_synced,
        raw_data,
    })
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total: usize,
    pub active: usize,
    pub trashed: usize,
    pub max_id: Option<u64>,
    pub latest_sync: Option<DateTime<Utc>>,
    pub schema_version: i64,
}

impl CacheStats {
    /// Forms that are neither active nor trashed
    pub fn inactive(&self) -> usize {
        self.total.saturating_sub(self.active + self.trashed)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Form Cache Statistics:")?;
        writeln!(f, "  Forms: {}", self.total)?;
        writeln!(f, "  Active: {}", self.active)?;
        writeln!(f, "  Inactive: {}", self.inactive())?;
        writeln!(f, "  Trashed: {}", self.trashed)?;
        match self.latest_sync {
            Some(ts) => writeln!(f, "  Last synced: {}", ts.to_rfc3339())?,
            None => writeln!(f, "  Last synced: never")?,
        }
        write!(f, "  Schema version: {}", self.schema_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn sample_record(id: u64, title: &str) -> FormRecord {
        FormRecord::new(id, title)
    }

    #[test]
    fn test_record_crud() {
        let store = FormStore::open_in_memory().unwrap();
        assert!(store.is_ready());

        let mut record = sample_record(0, "Zero is a real id");
        record.entry_count = 12;
        record.is_active = false;
        record.is_trash = true;
        record.raw_data = json!({ "id": "0", "title": "Zero is a real id", "status": "DELETED" });

        assert_eq!(store.upsert(&record).unwrap(), UpsertOutcome::Inserted);

        let retrieved = store.get_record(0).unwrap().unwrap();
        assert_eq!(retrieved.title, "Zero is a real id");
        assert_eq!(retrieved.entry_count, 12);
        assert!(!retrieved.is_active);
        assert!(retrieved.is_trash);
        assert_eq!(retrieved.raw_data, record.raw_data);
        assert_eq!(retrieved.last_synced.timestamp_millis(), record.last_synced.timestamp_millis());

        assert!(store.delete_record(0).unwrap());
        assert!(!store.delete_record(0).unwrap());
        assert!(store.get_record(0).unwrap().is_none());
    }

    #[test]
    fn test_upsert_is_idempotent_and_monotonic() {
        let store = FormStore::open_in_memory().unwrap();
        let now = Utc::now();

        let mut first = sample_record(7, "Survey");
        first.last_synced = now - ChronoDuration::minutes(5);
        let mut second = first.clone();
        second.last_synced = now;

        assert_eq!(store.upsert(&first).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&second).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.count(false).unwrap(), 1);
        assert_eq!(
            store.get_record(7).unwrap().unwrap().last_synced.timestamp_millis(),
            now.timestamp_millis()
        );

        // An older write updates fields but never rewinds last_synced
        let mut stale = second.clone();
        stale.title = "Survey v2".to_string();
        stale.last_synced = now - ChronoDuration::hours(1);
        store.upsert(&stale).unwrap();

        let stored = store.get_record(7).unwrap().unwrap();
        assert_eq!(stored.title, "Survey v2");
        assert_eq!(stored.last_synced.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_filters_and_counts() {
        let store = FormStore::open_in_memory().unwrap();

        store.upsert(&sample_record(1, "active")).unwrap();

        let mut inactive = sample_record(2, "inactive");
        inactive.is_active = false;
        store.upsert(&inactive).unwrap();

        let mut trashed = sample_record(3, "trashed");
        trashed.is_active = false;
        trashed.is_trash = true;
        store.upsert(&trashed).unwrap();

        assert_eq!(store.get_all_records(false, false).unwrap().len(), 3);
        assert_eq!(store.get_all_records(true, false).unwrap().len(), 1);
        let not_trashed: Vec<u64> = store.get_all_records(false, true).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(not_trashed, vec![1, 2]);

        assert_eq!(store.count(false).unwrap(), 3);
        assert_eq!(store.count(true).unwrap(), 1);
        assert_eq!(store.max_id().unwrap(), Some(3));
        assert_eq!(store.all_ids().unwrap(), vec![1, 2, 3]);

        let stats = store.stats().unwrap();
        assert_eq!((stats.total, stats.active, stats.trashed, stats.inactive()), (3, 1, 1, 1));
    }

    #[test]
    fn test_out_of_range_id_rejected() {
        let store = FormStore::open_in_memory().unwrap();
        let err = store.get_record(u64::MAX).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_metadata_and_invalidation() {
        let store = FormStore::open_in_memory().unwrap();
        assert!(store.get_metadata("last_full_sync").unwrap().is_none());

        store.set_metadata("last_full_sync", "a").unwrap();
        store.set_metadata("last_full_sync", "b").unwrap();
        assert_eq!(store.get_metadata("last_full_sync").unwrap().as_deref(), Some("b"));

        store.upsert(&sample_record(1, "x")).unwrap();
        store.clear_all().unwrap();
        assert_eq!(store.count(false).unwrap(), 0);
        assert!(store.get_metadata("last_full_sync").unwrap().is_none());
        assert!(store.latest_sync_time().unwrap().is_none());
    }

    #[test]
    fn test_migrates_v1_store_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.db");

        // Build a store as version 1 code would have left it
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(schema::CREATE_SCHEMA_VERSION_TABLE, []).unwrap();
            conn.execute(schema::CREATE_FORMS_TABLE, []).unwrap();
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (1, 'then')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO forms (id, title, is_active, last_synced, raw_data) VALUES (5, 'Legacy', 1, 0, '{}')",
                [],
            )
            .unwrap();
        }

        let store = FormStore::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        let legacy = store.get_record(5).unwrap().unwrap();
        assert_eq!(legacy.entry_count, 0);
        assert!(!legacy.is_trash);
        store.close().unwrap();

        // Reopening an up-to-date store is a no-op
        let store = FormStore::open(&path).unwrap();
        assert!(store.is_ready());
        assert_eq!(store.count(false).unwrap(), 1);
    }

    #[test]
    fn test_replayed_migration_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.db");
        FormStore::open(&path).unwrap().close().unwrap();

        // Forget that v3 ran; its column already exists
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("DELETE FROM schema_version WHERE version = 3", []).unwrap();
        }

        let store = FormStore::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), 3);
    }

    #[test]
    fn test_refuses_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(schema::CREATE_SCHEMA_VERSION_TABLE, []).unwrap();
            conn.execute("INSERT INTO schema_version (version, applied_at) VALUES (99, 'future')", [])
                .unwrap();
        }

        let err = FormStore::open(&path).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_bad_paths_are_configuration_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(FormStore::open(dir.path()).err().unwrap(), Error::Configuration(_)));
        assert!(matches!(FormStore::open(Path::new("")).err().unwrap(), Error::Configuration(_)));
    }

    #[test]
    fn test_corrupt_file_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.db");
        std::fs::write(&path, "not an sqlite database\n".repeat(200)).unwrap();

        let err = FormStore::open(&path).err().unwrap();
        assert!(err.is_corruption(), "unexpected error: {}", err);
    }
}
