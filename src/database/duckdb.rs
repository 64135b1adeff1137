//! DuckDB database backend implementation
//!
//! Provides an embedded warehouse backend using DuckDB. Supports both
//! file-based persistence and in-memory mode.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::schema::{SCHEMA_VERSION, TrackingSchema, file_import_sql, import_history_sql};
use super::sql::{self, SqlDialect};
use super::{DatabaseBackend, DatabaseError, DatabaseResult};
use crate::models::{Column, ColumnType, KeyColumn, StoredColumn, TableSchema, Value};
use crate::tracking::{ImportCompletion, ImportStart, ImportTracker};

/// Bind parameters per DuckDB statement; keeps generated SQL short to parse
const DUCKDB_MAX_PARAMETERS: usize = 8_192;

/// DuckDB database backend
pub struct DuckDBBackend {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    /// DuckDB connection (wrapped in Mutex for thread safety)
    connection: Mutex<duckdb::Connection>,
}

impl DuckDBBackend {
    /// Create a new DuckDB backend with a file-based database
    ///
    /// # Arguments
    /// * `db_path` - Path to the DuckDB database file
    ///
    /// # Returns
    /// A new DuckDB backend instance
    pub fn new(db_path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to open DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: Some(path),
            connection: Mutex::new(connection),
        })
    }

    /// Create an in-memory DuckDB backend
    ///
    /// Useful for testing or dry runs where persistence is not needed.
    pub fn in_memory() -> DatabaseResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection: Mutex::new(connection),
        })
    }

    /// Get the database file path (None for in-memory)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Check if this is an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    fn lock(&self) -> DatabaseResult<MutexGuard<'_, duckdb::Connection>> {
        self.connection
            .lock()
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Lock error: {}", e)))
    }

    /// Execute multiple SQL statements
    fn execute_batch(&self, sql: &str) -> DatabaseResult<()> {
        self.lock()?
            .execute_batch(sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Batch execute failed: {}", e)))
    }

    fn query_count(
        conn: &duckdb::Connection,
        sql: &str,
        params: impl duckdb::Params,
    ) -> DatabaseResult<u64> {
        let count: i64 = conn
            .query_row(sql, params, |row| row.get(0))
            .map_err(|e| DatabaseError::QueryFailed(format!("Count failed: {}", e)))?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl DatabaseBackend for DuckDBBackend {
    async fn initialize(&self) -> DatabaseResult<()> {
        self.execute_batch(TrackingSchema::create_tables_sql())
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        self.execute_batch(TrackingSchema::create_indexes_sql())
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        self.lock()?
            .execute(
                "INSERT INTO consolidation_schema_version (version) VALUES (?) ON CONFLICT (version) DO NOTHING",
                [SCHEMA_VERSION],
            )
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to record schema version: {}", e))
            })?;

        Ok(())
    }

    async fn table_exists(&self, table: &str) -> DatabaseResult<bool> {
        let conn = self.lock()?;
        Self::query_count(
            &conn,
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = ?",
            [table],
        )
        .map(|count| count > 0)
    }

    async fn table_columns(&self, table: &str) -> DatabaseResult<Vec<StoredColumn>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = ? ORDER BY ordinal_position",
            )
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;

        let rows = stmt
            .query_map([table], |row| {
                Ok(StoredColumn::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| DatabaseError::QueryFailed(format!("Column query failed: {}", e)))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))
    }

    async fn row_count(&self, table: &str) -> DatabaseResult<u64> {
        let conn = self.lock()?;
        Self::query_count(&conn, &sql::row_count_sql(table), [])
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> DatabaseResult<()> {
        self.execute_batch(&sql::create_table_sql(SqlDialect::DuckDb, table, schema))
    }

    async fn replace_table(&self, table: &str, schema: &TableSchema) -> DatabaseResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(format!("Begin failed: {}", e)))?;

        tx.execute_batch(&sql::drop_table_sql(SqlDialect::DuckDb, table))
            .map_err(|e| DatabaseError::QueryFailed(format!("Drop failed: {}", e)))?;
        tx.execute_batch(&sql::create_table_sql(SqlDialect::DuckDb, table, schema))
            .map_err(|e| DatabaseError::QueryFailed(format!("Create failed: {}", e)))?;
        tx.execute(file_import_sql::DELETE_BY_TABLE, [table])
            .map_err(|e| {
                DatabaseError::QueryFailed(format!("Failed to clear file imports: {}", e))
            })?;

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(format!("Commit failed: {}", e)))
    }

    async fn add_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
    ) -> DatabaseResult<()> {
        self.lock()?
            .execute(
                &sql::add_column_sql(SqlDialect::DuckDb, table, column, column_type),
                [],
            )
            .map_err(|e| DatabaseError::QueryFailed(format!("Add column failed: {}", e)))?;
        Ok(())
    }

    async fn fetch_key_values(
        &self,
        table: &str,
        key: &[KeyColumn],
    ) -> DatabaseResult<Vec<Vec<Value>>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql::key_select_sql(table, key))
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;

        let width = key.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| {
                        row.get::<_, Option<String>>(i)
                            .map(|v| v.map(Value::Text).unwrap_or(Value::Null))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(|e| DatabaseError::QueryFailed(format!("Key query failed: {}", e)))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))
    }

    async fn count_key_matches(
        &self,
        table: &str,
        key: &[KeyColumn],
        tuples: &[Vec<Value>],
    ) -> DatabaseResult<u64> {
        if tuples.is_empty() || key.is_empty() {
            return Ok(0);
        }
        let sql = sql::key_match_sql(SqlDialect::DuckDb, table, key, tuples.len());
        let params = sql::text_params(tuples);
        let conn = self.lock()?;
        Self::query_count(&conn, &sql, duckdb::params_from_iter(params.iter()))
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[Column],
        rows: &[Vec<Value>],
    ) -> DatabaseResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let per_statement = sql::rows_per_statement(self.max_parameters(), columns.len());
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(format!("Begin failed: {}", e)))?;

        let mut inserted = 0u64;
        for batch in rows.chunks(per_statement) {
            let statement = sql::insert_sql(SqlDialect::DuckDb, table, columns, batch.len());
            let params = sql::text_params(batch);
            inserted += tx
                .execute(&statement, duckdb::params_from_iter(params.iter()))
                .map_err(|e| DatabaseError::QueryFailed(format!("Insert failed: {}", e)))?
                as u64;
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(format!("Commit failed: {}", e)))?;
        Ok(inserted)
    }

    async fn is_file_imported(&self, table: &str, file_hash: &str) -> DatabaseResult<bool> {
        let conn = self.lock()?;
        Self::query_count(&conn, file_import_sql::EXISTS, [table, file_hash]).map(|c| c > 0)
    }

    async fn record_file_import(
        &self,
        table: &str,
        file_hash: &str,
        row_count: u64,
    ) -> DatabaseResult<()> {
        self.lock()?
            .execute(
                file_import_sql::INSERT,
                duckdb::params![table, file_hash, row_count as i64],
            )
            .map_err(|e| {
                DatabaseError::QueryFailed(format!("Failed to record file import: {}", e))
            })?;
        Ok(())
    }

    fn max_parameters(&self) -> usize {
        DUCKDB_MAX_PARAMETERS
    }

    async fn health_check(&self) -> DatabaseResult<bool> {
        let conn = self.lock()?;
        let result: Result<i32, _> = conn.query_row("SELECT 1", [], |row| row.get(0));
        Ok(result.is_ok())
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }

    async fn close(&self) -> DatabaseResult<()> {
        // DuckDB connections are closed when dropped
        Ok(())
    }
}

#[async_trait]
impl ImportTracker for DuckDBBackend {
    async fn record_import_start(&self, start: &ImportStart) -> DatabaseResult<Uuid> {
        let import_id = Uuid::new_v4();
        self.lock()?
            .execute(
                import_history_sql::INSERT_STARTED,
                duckdb::params![
                    import_id.to_string(),
                    start.table_name,
                    start.file_hash,
                    start.records_received as i64,
                    start.started_at.to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(format!("Failed to record import: {}", e)))?;
        Ok(import_id)
    }

    async fn record_import_complete(
        &self,
        import_id: Uuid,
        completion: &ImportCompletion,
    ) -> DatabaseResult<()> {
        self.lock()?
            .execute(
                import_history_sql::UPDATE_COMPLETED,
                duckdb::params![
                    import_id.to_string(),
                    completion.status.as_str(),
                    completion.records_processed as i64,
                    completion.duplicates_found as i64,
                    completion.message,
                    completion.completed_at.to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(format!("Failed to update import: {}", e)))?;
        Ok(())
    }
}
