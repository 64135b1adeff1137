//! In-memory store
//!
//! Implements [`DatabaseBackend`] without any database, for tests and dry
//! runs. It records every store operation in order, tracks how many key
//! scans were in flight at once, and can inject latency or write failures so
//! concurrency, ordering and deadline behaviour can be observed.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::{DatabaseBackend, DatabaseError, DatabaseResult};
use crate::models::{
    Column, ColumnType, KeyColumn, ROW_ID_COLUMN, Record, StoredColumn, TableSchema, Value,
    comparable_tuple,
};
use crate::tracking::{ImportCompletion, ImportStart, ImportTracker};

/// A store operation as observed by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOperation {
    CreateTable { table: String },
    ReplaceTable { table: String },
    AddColumn { table: String, column: String },
    FetchKeys { table: String },
    KeyScan { table: String, tuples: usize },
    Insert { table: String, rows: usize },
    BulkLoad { table: String, rows: usize },
}

impl StoreOperation {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StoreOperation::Insert { .. } | StoreOperation::BulkLoad { .. }
        )
    }
}

/// One row of the in-memory import history
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub import_id: Uuid,
    pub table_name: String,
    pub file_hash: Option<String>,
    pub records_received: usize,
    pub status: String,
    pub records_processed: Option<usize>,
    pub duplicates_found: Option<u64>,
    pub message: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryTable {
    /// Includes the primary key at position 0
    columns: Vec<StoredColumn>,
    rows: Vec<Vec<Value>>,
    next_row_id: i64,
}

impl MemoryTable {
    fn new(schema: &TableSchema) -> Self {
        let mut columns = vec![StoredColumn::new(ROW_ID_COLUMN, "BIGINT")];
        columns.extend(
            schema
                .columns()
                .iter()
                .map(|c| StoredColumn::new(c.name.clone(), c.column_type.sql_type())),
        );
        Self {
            columns,
            rows: Vec::new(),
            next_row_id: 1,
        }
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    /// Build full stored rows; fails without side effects on unknown columns
    fn prepare_rows(
        &mut self,
        table: &str,
        columns: &[Column],
        rows: &[Vec<Value>],
    ) -> DatabaseResult<Vec<Vec<Value>>> {
        let positions = columns
            .iter()
            .map(|c| {
                self.position(&c.name).ok_or_else(|| {
                    DatabaseError::QueryFailed(format!(
                        "column \"{}\" of relation \"{}\" does not exist",
                        c.name, table
                    ))
                })
            })
            .collect::<DatabaseResult<Vec<_>>>()?;

        let mut prepared = Vec::with_capacity(rows.len());
        let mut next_row_id = self.next_row_id;
        for row in rows {
            if row.len() != columns.len() {
                return Err(DatabaseError::InvalidInput(format!(
                    "row has {} values for {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            let mut stored = vec![Value::Null; self.columns.len()];
            stored[0] = Value::Int(next_row_id);
            next_row_id += 1;
            for (value, &position) in row.iter().zip(&positions) {
                stored[position] = value.clone();
            }
            prepared.push(stored);
        }
        self.next_row_id = next_row_id;
        Ok(prepared)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    imported_files: HashMap<(String, String), u64>,
    history: Vec<HistoryEntry>,
    operations: Vec<StoreOperation>,
    bulk_loads: usize,
    initialized: bool,
}

/// In-memory [`DatabaseBackend`]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    scan_latency: Option<Duration>,
    write_latency: Option<Duration>,
    fail_bulk_load_at: Option<usize>,
    active_scans: AtomicUsize,
    peak_scans: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every key scan by `latency`
    pub fn with_scan_latency(mut self, latency: Duration) -> Self {
        self.scan_latency = Some(latency);
        self
    }

    /// Delay every insert and bulk load by `latency`
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = Some(latency);
        self
    }

    /// Make the bulk load with zero-based index `index` fail
    pub fn failing_bulk_load_at(mut self, index: usize) -> Self {
        self.fail_bulk_load_at = Some(index);
        self
    }

    fn lock(&self) -> DatabaseResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Lock error: {}", e)))
    }

    /// Create a table with raw store type names and rows, bypassing the engine
    ///
    /// # Arguments
    /// * `table` - Table name
    /// * `columns` - `(name, store type)` pairs, without the primary key
    /// * `rows` - Row values aligned with `columns`
    pub fn seed_table(
        &self,
        table: &str,
        columns: &[(&str, &str)],
        rows: Vec<Vec<Value>>,
    ) -> DatabaseResult<()> {
        let mut state = self.lock()?;
        let mut memory_table = MemoryTable {
            columns: std::iter::once(StoredColumn::new(ROW_ID_COLUMN, "BIGINT"))
                .chain(columns.iter().map(|(n, t)| StoredColumn::new(*n, *t)))
                .collect(),
            rows: Vec::new(),
            next_row_id: 1,
        };
        let insert_columns: Vec<Column> = columns
            .iter()
            .map(|(n, _)| Column::new(*n, ColumnType::Text))
            .collect();
        let prepared = memory_table.prepare_rows(table, &insert_columns, &rows)?;
        memory_table.rows = prepared;
        state.tables.insert(table.to_string(), memory_table);
        Ok(())
    }

    /// Operations observed so far, in order
    pub fn operations(&self) -> Vec<StoreOperation> {
        self.lock().map(|s| s.operations.clone()).unwrap_or_default()
    }

    pub fn clear_operations(&self) {
        if let Ok(mut state) = self.lock() {
            state.operations.clear();
        }
    }

    /// Highest number of key scans observed in flight at once
    pub fn peak_concurrent_scans(&self) -> usize {
        self.peak_scans.load(Ordering::SeqCst)
    }

    /// Stored rows as records, without the primary key
    pub fn records(&self, table: &str) -> DatabaseResult<Vec<Record>> {
        let state = self.lock()?;
        let memory_table = state
            .tables
            .get(table)
            .ok_or_else(|| DatabaseError::TableNotFound(table.to_string()))?;
        Ok(memory_table
            .rows
            .iter()
            .map(|row| {
                memory_table
                    .columns
                    .iter()
                    .zip(row)
                    .skip(1)
                    .map(|(c, v)| (c.name.clone(), v.clone()))
                    .collect()
            })
            .collect())
    }

    /// Values of one column across all stored rows
    pub fn column_values(&self, table: &str, column: &str) -> DatabaseResult<Vec<Value>> {
        Ok(self
            .records(table)?
            .iter()
            .map(|r| r.get(column).cloned().unwrap_or_default())
            .collect())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().map(|s| s.initialized).unwrap_or(false)
    }

    pub fn import_history(&self) -> Vec<HistoryEntry> {
        self.lock().map(|s| s.history.clone()).unwrap_or_default()
    }

    async fn scan_delay(&self) {
        let active = self.active_scans.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_scans.fetch_max(active, Ordering::SeqCst);
        if let Some(latency) = self.scan_latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn end_scan(&self) {
        self.active_scans.fetch_sub(1, Ordering::SeqCst);
    }

    async fn write(
        &self,
        table: &str,
        columns: &[Column],
        rows: &[Vec<Value>],
        bulk: bool,
    ) -> DatabaseResult<u64> {
        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock()?;
        let operation = if bulk {
            let index = state.bulk_loads;
            state.bulk_loads += 1;
            if self.fail_bulk_load_at == Some(index) {
                return Err(DatabaseError::TransactionFailed(format!(
                    "injected failure on bulk load {}",
                    index
                )));
            }
            StoreOperation::BulkLoad {
                table: table.to_string(),
                rows: rows.len(),
            }
        } else {
            StoreOperation::Insert {
                table: table.to_string(),
                rows: rows.len(),
            }
        };

        let memory_table = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DatabaseError::TableNotFound(table.to_string()))?;
        let prepared = memory_table.prepare_rows(table, columns, rows)?;
        memory_table.rows.extend(prepared);
        state.operations.push(operation);
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl DatabaseBackend for MemoryBackend {
    async fn initialize(&self) -> DatabaseResult<()> {
        self.lock()?.initialized = true;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> DatabaseResult<bool> {
        Ok(self.lock()?.tables.contains_key(table))
    }

    async fn table_columns(&self, table: &str) -> DatabaseResult<Vec<StoredColumn>> {
        Ok(self
            .lock()?
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn row_count(&self, table: &str) -> DatabaseResult<u64> {
        self.lock()?
            .tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| DatabaseError::TableNotFound(table.to_string()))
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> DatabaseResult<()> {
        let mut state = self.lock()?;
        state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| MemoryTable::new(schema));
        state.operations.push(StoreOperation::CreateTable {
            table: table.to_string(),
        });
        Ok(())
    }

    async fn replace_table(&self, table: &str, schema: &TableSchema) -> DatabaseResult<()> {
        let mut state = self.lock()?;
        state
            .tables
            .insert(table.to_string(), MemoryTable::new(schema));
        state.imported_files.retain(|(t, _), _| t != table);
        state.operations.push(StoreOperation::ReplaceTable {
            table: table.to_string(),
        });
        Ok(())
    }

    async fn add_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
    ) -> DatabaseResult<()> {
        let mut state = self.lock()?;
        let memory_table = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DatabaseError::TableNotFound(table.to_string()))?;
        if memory_table.position(column).is_none() {
            memory_table
                .columns
                .push(StoredColumn::new(column, column_type.sql_type()));
            for row in &mut memory_table.rows {
                row.push(Value::Null);
            }
        }
        state.operations.push(StoreOperation::AddColumn {
            table: table.to_string(),
            column: column.to_string(),
        });
        Ok(())
    }

    async fn fetch_key_values(
        &self,
        table: &str,
        key: &[KeyColumn],
    ) -> DatabaseResult<Vec<Vec<Value>>> {
        let mut state = self.lock()?;
        let memory_table = state
            .tables
            .get(table)
            .ok_or_else(|| DatabaseError::TableNotFound(table.to_string()))?;
        let positions = key_positions(memory_table, table, key)?;
        let values = memory_table
            .rows
            .iter()
            .map(|row| positions.iter().map(|&p| row[p].clone()).collect())
            .collect();
        state.operations.push(StoreOperation::FetchKeys {
            table: table.to_string(),
        });
        Ok(values)
    }

    async fn count_key_matches(
        &self,
        table: &str,
        key: &[KeyColumn],
        tuples: &[Vec<Value>],
    ) -> DatabaseResult<u64> {
        self.scan_delay().await;
        let result = (|| -> DatabaseResult<u64> {
            let mut state = self.lock()?;
            let memory_table = state
                .tables
                .get(table)
                .ok_or_else(|| DatabaseError::TableNotFound(table.to_string()))?;
            let positions = key_positions(memory_table, table, key)?;
            let existing: HashSet<Vec<String>> = memory_table
                .rows
                .iter()
                .filter_map(|row| {
                    let values: Vec<Value> = positions.iter().map(|&p| row[p].clone()).collect();
                    comparable_tuple(&values, key)
                })
                .collect();
            let matches = tuples
                .iter()
                .filter_map(|tuple| comparable_tuple(tuple, key))
                .filter(|tuple| existing.contains(tuple))
                .count() as u64;
            state.operations.push(StoreOperation::KeyScan {
                table: table.to_string(),
                tuples: tuples.len(),
            });
            Ok(matches)
        })();
        self.end_scan();
        result
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[Column],
        rows: &[Vec<Value>],
    ) -> DatabaseResult<u64> {
        self.write(table, columns, rows, false).await
    }

    async fn bulk_load(
        &self,
        table: &str,
        columns: &[Column],
        rows: &[Vec<Value>],
    ) -> DatabaseResult<u64> {
        self.write(table, columns, rows, true).await
    }

    async fn is_file_imported(&self, table: &str, file_hash: &str) -> DatabaseResult<bool> {
        Ok(self
            .lock()?
            .imported_files
            .contains_key(&(table.to_string(), file_hash.to_string())))
    }

    async fn record_file_import(
        &self,
        table: &str,
        file_hash: &str,
        row_count: u64,
    ) -> DatabaseResult<()> {
        self.lock()?
            .imported_files
            .entry((table.to_string(), file_hash.to_string()))
            .or_insert(row_count);
        Ok(())
    }

    async fn health_check(&self) -> DatabaseResult<bool> {
        Ok(self.lock().is_ok())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn close(&self) -> DatabaseResult<()> {
        Ok(())
    }
}

fn key_positions(
    memory_table: &MemoryTable,
    table: &str,
    key: &[KeyColumn],
) -> DatabaseResult<Vec<usize>> {
    key.iter()
        .map(|k| {
            memory_table.position(&k.name).ok_or_else(|| {
                DatabaseError::QueryFailed(format!(
                    "column \"{}\" of relation \"{}\" does not exist",
                    k.name, table
                ))
            })
        })
        .collect()
}

#[async_trait]
impl ImportTracker for MemoryBackend {
    async fn record_import_start(&self, start: &ImportStart) -> DatabaseResult<Uuid> {
        let import_id = Uuid::new_v4();
        self.lock()?.history.push(HistoryEntry {
            import_id,
            table_name: start.table_name.clone(),
            file_hash: start.file_hash.clone(),
            records_received: start.records_received,
            status: "started".to_string(),
            records_processed: None,
            duplicates_found: None,
            message: None,
        });
        Ok(import_id)
    }

    async fn record_import_complete(
        &self,
        import_id: Uuid,
        completion: &ImportCompletion,
    ) -> DatabaseResult<()> {
        let mut state = self.lock()?;
        let entry = state
            .history
            .iter_mut()
            .find(|e| e.import_id == import_id)
            .ok_or_else(|| DatabaseError::InvalidInput(format!("Unknown import {}", import_id)))?;
        entry.status = completion.status.as_str().to_string();
        entry.records_processed = Some(completion.records_processed);
        entry.duplicates_found = Some(completion.duplicates_found);
        entry.message = completion.message.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeyKind;

    fn schema() -> TableSchema {
        TableSchema::from_pairs([("email", ColumnType::Text), ("age", ColumnType::Integer)])
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_introspect() {
        let backend = MemoryBackend::new();
        backend.create_table("contacts", &schema()).await.unwrap();
        let columns = backend.table_columns("contacts").await.unwrap();
        assert_eq!(columns[0].name, ROW_ID_COLUMN);
        assert_eq!(columns[2], StoredColumn::new("age", "BIGINT"));
        assert!(backend.table_columns("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_assigns_row_ids_and_fills_missing_columns() {
        let backend = MemoryBackend::new();
        backend.create_table("contacts", &schema()).await.unwrap();
        let columns = vec![Column::new("email", ColumnType::Text)];
        backend
            .insert_rows("contacts", &columns, &[vec![Value::from("a@x.com")]])
            .await
            .unwrap();
        let records = backend.records("contacts").unwrap();
        assert_eq!(records[0].get("email"), Some(&Value::from("a@x.com")));
        assert_eq!(records[0].get("age"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_insert_unknown_column_writes_nothing() {
        let backend = MemoryBackend::new();
        backend.create_table("contacts", &schema()).await.unwrap();
        let columns = vec![Column::new("phone", ColumnType::Text)];
        let result = backend
            .insert_rows("contacts", &columns, &[vec![Value::from("1")]])
            .await;
        assert!(result.is_err());
        assert_eq!(backend.row_count("contacts").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_key_matches_normalizes_numbers() {
        let backend = MemoryBackend::new();
        backend
            .seed_table("t", &[("age", "INTEGER")], vec![vec![Value::Int(30)]])
            .unwrap();
        let key = vec![KeyColumn::new("age", KeyKind::Numeric)];
        let matches = backend
            .count_key_matches(
                "t",
                &key,
                &[vec![Value::from("30.0")], vec![Value::Float(30.0)], vec![Value::Int(31)]],
            )
            .await
            .unwrap();
        assert_eq!(matches, 2);
    }

    #[tokio::test]
    async fn test_replace_table_clears_file_records() {
        let backend = MemoryBackend::new();
        backend.create_table("t", &schema()).await.unwrap();
        backend.record_file_import("t", "abc", 1).await.unwrap();
        backend.replace_table("t", &schema()).await.unwrap();
        assert!(!backend.is_file_imported("t", "abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_column_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.create_table("t", &schema()).await.unwrap();
        backend.add_column("t", "phone", ColumnType::Text).await.unwrap();
        backend.add_column("t", "phone", ColumnType::Text).await.unwrap();
        assert_eq!(backend.table_columns("t").await.unwrap().len(), 4);
    }
}
