//! Database schema definitions and migrations
//!
//! Migrations are additive and idempotent: every step may be replayed
//! against a store that already has it applied.

/// Schema version this build of the code expects
pub const CURRENT_SCHEMA_VERSION: i64 = 3;

/// SQL to create the schema_version table
pub const CREATE_SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
)
"#;

/// SQL to create the forms table as it looked in version 1
pub const CREATE_FORMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS forms (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_synced INTEGER NOT NULL,
    raw_data TEXT NOT NULL
)
"#;

/// SQL to create the sync_metadata key-value table
pub const CREATE_SYNC_METADATA_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sync_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// A single migration step.
#[derive(Debug, Clone, Copy)]
pub enum MigrationStep {
    /// `ALTER TABLE .. ADD COLUMN`, skipped when the column already exists
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
    /// Arbitrary idempotent statement (`CREATE .. IF NOT EXISTS`)
    Execute(&'static str),
}

/// A versioned group of migration steps.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub steps: &'static [MigrationStep],
}

/// All migrations in version order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create forms table",
        steps: &[MigrationStep::Execute(CREATE_FORMS_TABLE)],
    },
    Migration {
        version: 2,
        description: "track entry counts",
        steps: &[MigrationStep::AddColumn {
            table: "forms",
            column: "entry_count",
            definition: "INTEGER NOT NULL DEFAULT 0",
        }],
    },
    Migration {
        version: 3,
        description: "track trashed forms and sync metadata",
        steps: &[
            MigrationStep::AddColumn {
                table: "forms",
                column: "is_trash",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            MigrationStep::Execute(CREATE_SYNC_METADATA_TABLE),
        ],
    },
];

/// Indexes, created after migrations so every column exists
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_forms_active ON forms(is_active)",
    "CREATE INDEX IF NOT EXISTS idx_forms_trash ON forms(is_trash)",
    "CREATE INDEX IF NOT EXISTS idx_forms_last_synced ON forms(last_synced)",
];

/// Migrations that still need to run against a store at `from_version`
pub fn pending_migrations(from_version: i64) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |m| m.version > from_version)
}
