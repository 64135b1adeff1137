//! Relational store abstraction for the consolidation engine
//!
//! This module provides a store abstraction layer that supports:
//! - DuckDB: Embedded database for local warehouses and tests
//! - PostgreSQL: Shared warehouse for server deployments, pooled via deadpool
//! - Memory: Dependency-free store for tests and dry runs
//!
//! The engine never issues free-form SQL. Every operation it needs from the
//! store is a method of [`DatabaseBackend`], and every backend renders the
//! statements for those methods through [`sql`].

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

// Re-export implementations based on features
#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod config;
pub mod memory;
pub mod schema;
pub mod sql;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDBBackend;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::PostgresBackend;

pub use config::{ConsolidationConfig, DatabaseBackendType};
pub use memory::{MemoryBackend, StoreOperation};
pub use schema::TrackingSchema;
pub use sql::SqlDialect;

use crate::models::{Column, ColumnType, KeyColumn, StoredColumn, TableSchema, Value};
use crate::tracking::ImportTracker;

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Transaction failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Target table does not exist
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Default bind-parameter limit per statement (PostgreSQL's wire limit)
pub const DEFAULT_MAX_PARAMETERS: usize = 65_535;

/// Store driver used by the consolidation engine
///
/// Implementations must be shareable across tasks: duplicate scans run
/// concurrently on a worker pool while commits run sequentially.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Initialize the tracking schema (run migrations)
    ///
    /// Creates the file-import and import-history tables if they don't exist.
    async fn initialize(&self) -> DatabaseResult<()>;

    /// Check whether a table exists
    ///
    /// # Arguments
    /// * `table` - Table name
    async fn table_exists(&self, table: &str) -> DatabaseResult<bool>;

    /// Read a table's columns and store-reported types in ordinal order
    ///
    /// # Arguments
    /// * `table` - Table name
    ///
    /// # Returns
    /// The columns including the primary key, or an empty list if the table
    /// does not exist
    async fn table_columns(&self, table: &str) -> DatabaseResult<Vec<StoredColumn>>;

    /// Count the rows of a table
    ///
    /// # Arguments
    /// * `table` - Table name
    async fn row_count(&self, table: &str) -> DatabaseResult<u64>;

    /// Create a table with the schema plus the auto-generated primary key
    ///
    /// Succeeds if the table already exists, including when another session
    /// created it concurrently.
    ///
    /// # Arguments
    /// * `table` - Table name
    /// * `schema` - Declared schema
    async fn create_table(&self, table: &str, schema: &TableSchema) -> DatabaseResult<()>;

    /// Drop and recreate a table in one transaction
    ///
    /// File-import records for the table are cleared in the same transaction.
    ///
    /// # Arguments
    /// * `table` - Table name
    /// * `schema` - Declared schema
    async fn replace_table(&self, table: &str, schema: &TableSchema) -> DatabaseResult<()>;

    /// Add a column if it is not present
    ///
    /// # Arguments
    /// * `table` - Table name
    /// * `column` - Column name
    /// * `column_type` - Type of the new column
    async fn add_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
    ) -> DatabaseResult<()>;

    /// Read the values of the key columns of every stored row
    ///
    /// # Arguments
    /// * `table` - Table name
    /// * `key` - Key columns
    ///
    /// # Returns
    /// One tuple per stored row, in key column order
    async fn fetch_key_values(
        &self,
        table: &str,
        key: &[KeyColumn],
    ) -> DatabaseResult<Vec<Vec<Value>>>;

    /// Count incoming key tuples that exist in the table
    ///
    /// Both sides are compared after casting to the key kind's comparison
    /// type. Each incoming tuple counts once if any stored row has the same
    /// key. Callers pass only tuples without missing components and keep
    /// each call within [`DatabaseBackend::max_parameters`].
    ///
    /// # Arguments
    /// * `table` - Table name
    /// * `key` - Key columns
    /// * `tuples` - Incoming key tuples, in key column order
    async fn count_key_matches(
        &self,
        table: &str,
        key: &[KeyColumn],
        tuples: &[Vec<Value>],
    ) -> DatabaseResult<u64>;

    /// Insert rows in a single transaction
    ///
    /// # Arguments
    /// * `table` - Table name
    /// * `columns` - Columns the row values are aligned with
    /// * `rows` - Row values
    ///
    /// # Returns
    /// Number of rows inserted
    async fn insert_rows(
        &self,
        table: &str,
        columns: &[Column],
        rows: &[Vec<Value>],
    ) -> DatabaseResult<u64>;

    /// Load rows through the store's bulk path, atomically
    ///
    /// Defaults to [`DatabaseBackend::insert_rows`].
    async fn bulk_load(
        &self,
        table: &str,
        columns: &[Column],
        rows: &[Vec<Value>],
    ) -> DatabaseResult<u64> {
        self.insert_rows(table, columns, rows).await
    }

    /// Check whether a file hash was recorded for a table
    async fn is_file_imported(&self, table: &str, file_hash: &str) -> DatabaseResult<bool>;

    /// Record a file hash for a table; recording twice is a no-op
    async fn record_file_import(
        &self,
        table: &str,
        file_hash: &str,
        row_count: u64,
    ) -> DatabaseResult<()>;

    /// Maximum bind parameters in one statement
    fn max_parameters(&self) -> usize {
        DEFAULT_MAX_PARAMETERS
    }

    /// Check if database is healthy and accessible
    async fn health_check(&self) -> DatabaseResult<bool>;

    /// Get the database backend type name
    ///
    /// # Returns
    /// Backend type string ("duckdb", "postgres" or "memory")
    fn backend_type(&self) -> &'static str;

    /// Close the database connection
    async fn close(&self) -> DatabaseResult<()>;
}

/// Store opened from configuration
///
/// Every bundled backend also records import history, so the same store is
/// handed out as both the driver and the tracker.
#[derive(Clone)]
pub struct OpenedStore {
    pub backend: Arc<dyn DatabaseBackend>,
    pub tracker: Arc<dyn ImportTracker>,
}

impl OpenedStore {
    fn shared<B>(store: B) -> Self
    where
        B: DatabaseBackend + ImportTracker + 'static,
    {
        let store = Arc::new(store);
        Self {
            backend: store.clone(),
            tracker: store,
        }
    }
}

/// Open and initialize the backend a configuration selects
///
/// # Arguments
/// * `config` - Loaded configuration
/// * `workspace_path` - Directory relative DuckDB paths resolve against
pub async fn open_backend(
    config: &ConsolidationConfig,
    workspace_path: &Path,
) -> DatabaseResult<OpenedStore> {
    let store = match config.database.backend {
        DatabaseBackendType::Memory => OpenedStore::shared(MemoryBackend::new()),
        #[cfg(feature = "duckdb-backend")]
        DatabaseBackendType::DuckDB => {
            OpenedStore::shared(DuckDBBackend::new(config.get_duckdb_path(workspace_path))?)
        }
        #[cfg(feature = "postgres-backend")]
        DatabaseBackendType::Postgres => {
            let connection_string = config.get_postgres_connection_string().ok_or_else(|| {
                DatabaseError::ConfigError("PostgreSQL connection string not set".to_string())
            })?;
            OpenedStore::shared(
                PostgresBackend::new(connection_string, config.postgres.pool_size).await?,
            )
        }
        #[allow(unreachable_patterns)]
        other => {
            let _ = workspace_path;
            return Err(DatabaseError::ConfigError(format!(
                "Backend '{}' is not enabled in this build",
                other
            )));
        }
    };

    store.backend.initialize().await?;
    tracing::info!("Opened {} consolidation store", store.backend.backend_type());
    Ok(store)
}
