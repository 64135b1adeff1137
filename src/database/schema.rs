//! Tracking schema definitions
//!
//! Provides SQL for the engine's own bookkeeping tables. The SQL works with
//! both DuckDB and PostgreSQL; both accept `$n` positional parameters.

/// Schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Table holding the applied schema version
pub const SCHEMA_VERSION_TABLE: &str = "consolidation_schema_version";

/// Table of (table, file hash) pairs already imported
pub const IMPORTED_FILES_TABLE: &str = "consolidation_imported_files";

/// Table of import attempts and their outcomes
pub const IMPORT_HISTORY_TABLE: &str = "consolidation_import_history";

/// Tracking schema helper
pub struct TrackingSchema;

impl TrackingSchema {
    /// Get the tracking schema creation SQL
    pub fn create_tables_sql() -> &'static str {
        r#"
CREATE TABLE IF NOT EXISTS consolidation_schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- File-level duplicate detection
CREATE TABLE IF NOT EXISTS consolidation_imported_files (
    table_name TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    row_count BIGINT NOT NULL DEFAULT 0,
    imported_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (table_name, file_hash)
);

-- Import tracking sink
CREATE TABLE IF NOT EXISTS consolidation_import_history (
    import_id TEXT PRIMARY KEY,
    table_name TEXT NOT NULL,
    file_hash TEXT,
    records_received BIGINT NOT NULL DEFAULT 0,
    records_processed BIGINT,
    duplicates_found BIGINT,
    status TEXT NOT NULL,
    message TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);
"#
    }

    /// Get the index creation SQL
    pub fn create_indexes_sql() -> &'static str {
        r#"
CREATE INDEX IF NOT EXISTS idx_import_history_table ON consolidation_import_history(table_name);
"#
    }
}

/// SQL for file-import records
pub mod file_import_sql {
    pub const INSERT: &str = r#"
INSERT INTO consolidation_imported_files (table_name, file_hash, row_count)
VALUES ($1, $2, $3)
ON CONFLICT (table_name, file_hash) DO NOTHING
"#;

    pub const EXISTS: &str =
        "SELECT COUNT(*) FROM consolidation_imported_files WHERE table_name = $1 AND file_hash = $2";

    pub const DELETE_BY_TABLE: &str =
        "DELETE FROM consolidation_imported_files WHERE table_name = $1";
}

/// SQL for import history
pub mod import_history_sql {
    pub const INSERT_STARTED: &str = r#"
INSERT INTO consolidation_import_history (import_id, table_name, file_hash, records_received, status, started_at)
VALUES ($1, $2, $3, $4, 'started', $5)
"#;

    pub const UPDATE_COMPLETED: &str = r#"
UPDATE consolidation_import_history SET
    status = $2,
    records_processed = $3,
    duplicates_found = $4,
    message = $5,
    completed_at = $6
WHERE import_id = $1
"#;
}
