//! Table lifecycle management
//!
//! Ensures a target table exists with a schema the incoming batch can be
//! written into. Schema changes for one table name are serialized in-process;
//! the backends make each change transactional.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use crate::database::{DatabaseBackend, DatabaseError};
use crate::error::ConsolidationResult;
use crate::models::{
    ColumnType, StoredColumn, TableAction, TableSchema, TableStrategy, TargetDescriptor,
    normalize_type_name,
};
use crate::validation::{validate_column_name, validate_table_name};

/// Registry of per-table async locks
///
/// An entry lives only while some caller holds or waits for it.
#[derive(Debug, Default)]
pub(crate) struct TableLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TableLocks {
    /// Wait for exclusive use of `table`
    pub(crate) async fn acquire(&self, table: &str) -> ConsolidationResult<TableGuard<'_>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|e| DatabaseError::ConnectionFailed(format!("Lock error: {}", e)))?;
            locks.entry(table.to_string()).or_default().clone()
        };
        Ok(TableGuard {
            guard: Some(lock.lock_owned().await),
            table: table.to_string(),
            locks: self,
        })
    }

    fn release(&self, table: &str) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // the map's own reference is the only one left
        let idle = locks
            .get(table)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(table);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Exclusive use of one table; dropping it releases the lock
pub(crate) struct TableGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    table: String,
    locks: &'a TableLocks,
}

impl Drop for TableGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.table);
    }
}

/// Table state after [`TableManager::ensure_table`]
#[derive(Debug, Clone, PartialEq)]
pub struct EnsuredTable {
    pub action: TableAction,
    /// Schema rows must be aligned with: the declared schema, or for a
    /// diverged table the stored shape
    pub schema: TableSchema,
    /// Columns added to a diverged table under [`TableStrategy::Extend`]
    pub added_columns: Vec<String>,
}

/// Whether a stored table has exactly the declared columns and types
///
/// Types are compared in the canonical vocabulary of
/// [`normalize_type_name`], so `VARCHAR(255)` equals `TEXT` and `NUMERIC`
/// equals `DECIMAL`. Column order and the primary key are ignored.
pub fn schemas_match(declared: &TableSchema, stored: &[StoredColumn]) -> bool {
    let stored: HashMap<&str, String> = stored
        .iter()
        .filter(|c| !c.is_row_id())
        .map(|c| (c.name.as_str(), normalize_type_name(&c.data_type)))
        .collect();

    stored.len() == declared.len()
        && declared.columns().iter().all(|column| {
            stored
                .get(column.name.as_str())
                .is_some_and(|ty| ty == column.column_type.canonical_token())
        })
}

/// Creates, recreates and extends target tables
pub struct TableManager {
    backend: Arc<dyn DatabaseBackend>,
    ddl_locks: TableLocks,
}

impl TableManager {
    pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
        Self {
            backend,
            ddl_locks: TableLocks::default(),
        }
    }

    /// Make sure the descriptor's table exists in a usable shape
    ///
    /// Idempotent: a second call with the same descriptor reports
    /// [`TableAction::Unchanged`].
    ///
    /// # Arguments
    /// * `descriptor` - Target table, declared schema and strategy
    pub async fn ensure_table(
        &self,
        descriptor: &TargetDescriptor,
    ) -> ConsolidationResult<EnsuredTable> {
        descriptor.validate()?;
        let table = descriptor.table_name.as_str();
        let declared = &descriptor.schema;
        let _guard = self.ddl_locks.acquire(table).await?;

        let stored = self.backend.table_columns(table).await?;
        if stored.is_empty() {
            self.backend.create_table(table, declared).await?;
            tracing::info!("Created table {} with {} columns", table, declared.len());
            return Ok(EnsuredTable {
                action: TableAction::Created,
                schema: declared.clone(),
                added_columns: Vec::new(),
            });
        }

        if schemas_match(declared, &stored) {
            tracing::debug!("Table {} matches its declared schema", table);
            return Ok(EnsuredTable {
                action: TableAction::Unchanged,
                schema: declared.clone(),
                added_columns: Vec::new(),
            });
        }

        if descriptor.strategy.allows_drop() {
            self.backend.replace_table(table, declared).await?;
            tracing::info!(
                "Recreated table {} with {} columns after schema mismatch",
                table,
                declared.len()
            );
            return Ok(EnsuredTable {
                action: TableAction::Recreated,
                schema: declared.clone(),
                added_columns: Vec::new(),
            });
        }

        let mut added_columns = Vec::new();
        let stored = if descriptor.strategy == TableStrategy::Extend {
            let missing: Vec<String> = declared
                .column_names()
                .into_iter()
                .filter(|name| !stored.iter().any(|c| &c.name == name))
                .collect();
            added_columns = self.add_missing(table, &stored, &missing).await?;
            if added_columns.is_empty() {
                stored
            } else {
                self.backend.table_columns(table).await?
            }
        } else {
            stored
        };

        tracing::info!(
            "Keeping diverged table {} ({} stored columns, {} added)",
            table,
            stored.iter().filter(|c| !c.is_row_id()).count(),
            added_columns.len()
        );
        Ok(EnsuredTable {
            action: TableAction::Diverged,
            schema: TableSchema::from_stored(&stored)?,
            added_columns,
        })
    }

    /// Add TEXT columns that the table does not have yet
    ///
    /// # Arguments
    /// * `table` - Existing table
    /// * `columns` - Candidate column names
    ///
    /// # Returns
    /// The columns that were actually added
    pub async fn add_columns(
        &self,
        table: &str,
        columns: &[String],
    ) -> ConsolidationResult<Vec<String>> {
        validate_table_name(table)?;
        for column in columns {
            validate_column_name(column)?;
        }
        let _guard = self.ddl_locks.acquire(table).await?;

        let stored = self.backend.table_columns(table).await?;
        if stored.is_empty() {
            return Err(DatabaseError::TableNotFound(table.to_string()).into());
        }
        self.add_missing(table, &stored, columns).await
    }

    async fn add_missing(
        &self,
        table: &str,
        stored: &[StoredColumn],
        columns: &[String],
    ) -> ConsolidationResult<Vec<String>> {
        let mut present: HashSet<&str> = stored.iter().map(|c| c.name.as_str()).collect();
        let mut added = Vec::new();
        for column in columns {
            if !present.insert(column.as_str()) {
                continue;
            }
            self.backend
                .add_column(table, column, ColumnType::Text)
                .await?;
            tracing::info!("Added column {} to table {}", column, table);
            added.push(column.clone());
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryBackend;

    #[tokio::test]
    async fn test_released_locks_leave_the_registry() {
        let locks = TableLocks::default();
        for table in ["a", "b", "c"] {
            let _guard = locks.acquire(table).await.unwrap();
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_contended_lock_stays_until_last_waiter() {
        let locks = Arc::new(TableLocks::default());
        let first = locks.acquire("t").await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("t").await.unwrap();
            })
        };
        tokio::task::yield_now().await;
        drop(first);
        // the waiter still references the entry
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    fn name_only() -> TableSchema {
        TableSchema::from_pairs([("name", ColumnType::Text)]).unwrap()
    }

    fn name_and_age() -> TableSchema {
        TableSchema::from_pairs([("name", ColumnType::Text), ("age", ColumnType::Integer)])
            .unwrap()
    }

    #[test]
    fn test_schemas_match_normalizes_types() {
        let stored = vec![
            StoredColumn::new("_row_id", "BIGINT"),
            StoredColumn::new("name", "character varying(255)"),
            StoredColumn::new("age", "int4"),
        ];
        assert!(schemas_match(&name_and_age(), &stored));
        assert!(!schemas_match(&name_only(), &stored));

        let numeric = vec![StoredColumn::new("price", "NUMERIC(10,2)")];
        let declared = TableSchema::from_pairs([("price", ColumnType::Decimal)]).unwrap();
        assert!(schemas_match(&declared, &numeric));
    }

    #[test]
    fn test_schemas_match_is_case_sensitive() {
        let stored = vec![StoredColumn::new("Name", "text")];
        assert!(!schemas_match(&name_only(), &stored));
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = TableManager::new(backend.clone());
        let descriptor = TargetDescriptor::new("people", name_only());

        let first = manager.ensure_table(&descriptor).await.unwrap();
        assert_eq!(first.action, TableAction::Created);
        let second = manager.ensure_table(&descriptor).await.unwrap();
        assert_eq!(second.action, TableAction::Unchanged);
    }

    #[tokio::test]
    async fn test_varchar_table_is_unchanged() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed_table("people", &[("name", "VARCHAR")], Vec::new())
            .unwrap();
        let manager = TableManager::new(backend);

        let ensured = manager
            .ensure_table(&TargetDescriptor::new("people", name_only()))
            .await
            .unwrap();
        assert_eq!(ensured.action, TableAction::Unchanged);
    }

    #[tokio::test]
    async fn test_mismatch_recreates_under_replace() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed_table("people", &[("name", "TEXT")], Vec::new())
            .unwrap();
        backend.record_file_import("people", "abc", 1).await.unwrap();
        let manager = TableManager::new(backend.clone());

        let ensured = manager
            .ensure_table(&TargetDescriptor::new("people", name_and_age()))
            .await
            .unwrap();
        assert_eq!(ensured.action, TableAction::Recreated);
        assert_eq!(backend.table_columns("people").await.unwrap().len(), 3);
        assert!(!backend.is_file_imported("people", "abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_keeps_stored_shape() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed_table("people", &[("name", "TEXT"), ("tags", "jsonb")], Vec::new())
            .unwrap();
        let manager = TableManager::new(backend.clone());

        let descriptor =
            TargetDescriptor::new("people", name_and_age()).with_strategy(TableStrategy::Merge);
        let ensured = manager.ensure_table(&descriptor).await.unwrap();
        assert_eq!(ensured.action, TableAction::Diverged);
        assert_eq!(ensured.schema.column_names(), vec!["name", "tags"]);
        // unknown store types load as text
        assert_eq!(
            ensured.schema.get("tags").map(|c| c.column_type),
            Some(ColumnType::Text)
        );
    }

    #[tokio::test]
    async fn test_extend_adds_declared_columns() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed_table("people", &[("name", "TEXT"), ("city", "TEXT")], Vec::new())
            .unwrap();
        let manager = TableManager::new(backend.clone());

        let descriptor =
            TargetDescriptor::new("people", name_and_age()).with_strategy(TableStrategy::Extend);
        let ensured = manager.ensure_table(&descriptor).await.unwrap();
        assert_eq!(ensured.action, TableAction::Diverged);
        assert_eq!(ensured.added_columns, vec!["age"]);
        assert_eq!(ensured.schema.column_names(), vec!["name", "city", "age"]);
    }

    #[tokio::test]
    async fn test_add_columns_reports_only_new_columns() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = TableManager::new(backend.clone());
        manager
            .ensure_table(&TargetDescriptor::new("people", name_only()))
            .await
            .unwrap();

        let added = manager
            .add_columns("people", &["name".to_string(), "phone".to_string()])
            .await
            .unwrap();
        assert_eq!(added, vec!["phone"]);
        let again = manager
            .add_columns("people", &["phone".to_string()])
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_add_columns_to_missing_table_fails() {
        let manager = TableManager::new(Arc::new(MemoryBackend::new()));
        let result = manager.add_columns("ghost", &["a".to_string()]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_table_name_rejected() {
        let manager = TableManager::new(Arc::new(MemoryBackend::new()));
        let result = manager
            .ensure_table(&TargetDescriptor::new("bad-name", name_only()))
            .await;
        assert!(result.is_err());
    }
}
