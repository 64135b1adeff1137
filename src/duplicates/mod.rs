//! Duplicate detection
//!
//! File-level detection keys a content hash by table name. Row-level
//! detection counts incoming rows whose uniqueness key already exists in the
//! target table, either by loading the stored keys and intersecting in memory
//! (direct comparison) or by pushing `COUNT(*) ... WHERE EXISTS` queries to
//! the store (pushdown). Key tuples with a missing component never match, in
//! both strategies.

pub mod hash;

pub use hash::{FileHasher, Sha256Hasher, compute_file_hash, compute_hash};

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::database::config::{DEFAULT_PUSHDOWN_BATCH_ROWS, DEFAULT_SCAN_WORKERS};
use crate::database::{DatabaseBackend, DatabaseError, DatabaseResult};
use crate::error::{ConsolidationError, ConsolidationResult};
use crate::models::{
    DuplicateCheckPolicy, KeyColumn, KeyKind, TableSchema, Value, comparable_tuple,
};

/// Uniqueness key resolved against the effective schema
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedKey {
    /// Usable key columns; empty when the row-level check must be skipped
    pub columns: Vec<KeyColumn>,
    /// Positions of the key columns in rows aligned with the schema
    positions: Vec<usize>,
    pub warnings: Vec<String>,
}

impl ResolvedKey {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Key tuples of `rows`, skipping tuples with a missing component
    pub fn tuples(&self, rows: &[Vec<Value>]) -> Vec<Vec<Value>> {
        rows.iter()
            .filter_map(|row| {
                let tuple: Vec<Value> = self.positions.iter().map(|&p| row[p].clone()).collect();
                if tuple.iter().any(Value::is_missing) {
                    None
                } else {
                    Some(tuple)
                }
            })
            .collect()
    }
}

/// Counts found by the row-level check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplicateReport {
    /// Incoming rows whose key is already stored
    pub existing: u64,
    /// Incoming rows repeating an earlier row of the same batch
    pub intra_batch: u64,
}

impl DuplicateReport {
    /// Duplicates the policy treats as findings
    pub fn counted(&self, policy: &DuplicateCheckPolicy) -> u64 {
        if policy.include_intra_batch {
            self.existing + self.intra_batch
        } else {
            self.existing
        }
    }
}

/// Resolve the policy's uniqueness columns against a schema
///
/// Unknown columns are dropped with a warning. When the policy names no
/// columns, every column of the schema forms the key.
pub fn resolve_key(policy: &DuplicateCheckPolicy, schema: &TableSchema, table: &str) -> ResolvedKey {
    let requested: Vec<String> = match &policy.uniqueness_columns {
        Some(columns) => columns.clone(),
        None => schema.column_names(),
    };

    let mut columns = Vec::new();
    let mut positions = Vec::new();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();
    for name in requested {
        if !seen.insert(name.clone()) {
            continue;
        }
        match (schema.get(&name), schema.position(&name)) {
            (Some(column), Some(position)) => {
                columns.push(KeyColumn::new(
                    name,
                    KeyKind::for_column_type(column.column_type),
                ));
                positions.push(position);
            }
            _ => {
                tracing::warn!("Uniqueness column {} is not in table {}", name, table);
                warnings.push(format!(
                    "Uniqueness column '{}' is not in table '{}' and was ignored",
                    name, table
                ));
            }
        }
    }

    if columns.is_empty() {
        tracing::warn!("No usable uniqueness columns for table {}", table);
        warnings.push(format!(
            "No usable uniqueness columns for table '{}'; row-level duplicate check skipped",
            table
        ));
    }

    ResolvedKey {
        columns,
        positions,
        warnings,
    }
}

/// Count tuples repeating an earlier tuple of the same batch
pub fn count_intra_batch(tuples: &[Vec<Value>], key: &[KeyColumn]) -> u64 {
    let mut seen = HashSet::with_capacity(tuples.len());
    tuples
        .iter()
        .filter_map(|tuple| comparable_tuple(tuple, key))
        .filter(|comparable| !seen.insert(comparable.clone()))
        .count() as u64
}

/// Pushdown count in sub-batches, issued sequentially
async fn pushdown_count(
    backend: &dyn DatabaseBackend,
    table: &str,
    key: &[KeyColumn],
    tuples: &[Vec<Value>],
    batch_rows: usize,
) -> DatabaseResult<u64> {
    if key.is_empty() {
        return Ok(0);
    }
    let batch = batch_rows
        .min(backend.max_parameters() / key.len())
        .max(1);

    let mut matches = 0;
    for sub_batch in tuples.chunks(batch) {
        matches += backend.count_key_matches(table, key, sub_batch).await?;
    }
    Ok(matches)
}

/// File- and row-level duplicate checks against one store
pub struct DuplicateDetector {
    backend: Arc<dyn DatabaseBackend>,
    scan_workers: usize,
    pushdown_batch_rows: usize,
}

impl DuplicateDetector {
    pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
        Self {
            backend,
            scan_workers: DEFAULT_SCAN_WORKERS,
            pushdown_batch_rows: DEFAULT_PUSHDOWN_BATCH_ROWS,
        }
    }

    pub fn with_scan_workers(mut self, workers: usize) -> Self {
        self.scan_workers = workers.max(1);
        self
    }

    pub fn with_pushdown_batch_rows(mut self, rows: usize) -> Self {
        self.pushdown_batch_rows = rows.max(1);
        self
    }

    /// Reject a file already imported into the table
    pub async fn check_file(&self, table: &str, file_hash: &str) -> ConsolidationResult<()> {
        if self.backend.is_file_imported(table, file_hash).await? {
            tracing::info!("File {} was already imported into {}", file_hash, table);
            return Err(ConsolidationError::FileAlreadyImported {
                table: table.to_string(),
                file_hash: file_hash.to_string(),
            });
        }
        Ok(())
    }

    /// Remember a committed file; recording twice is a no-op
    pub async fn record_file(
        &self,
        table: &str,
        file_hash: &str,
        row_count: u64,
    ) -> ConsolidationResult<()> {
        self.backend
            .record_file_import(table, file_hash, row_count)
            .await?;
        Ok(())
    }

    /// Direct comparison: load the stored keys and intersect in memory
    ///
    /// # Arguments
    /// * `table` - Target table
    /// * `key` - Key columns
    /// * `tuples` - Incoming key tuples
    ///
    /// # Returns
    /// Number of incoming tuples whose key is stored
    pub async fn count_direct(
        &self,
        table: &str,
        key: &[KeyColumn],
        tuples: &[Vec<Value>],
    ) -> ConsolidationResult<u64> {
        if key.is_empty() || tuples.is_empty() {
            return Ok(0);
        }
        let existing: HashSet<Vec<String>> = self
            .backend
            .fetch_key_values(table, key)
            .await?
            .iter()
            .filter_map(|values| comparable_tuple(values, key))
            .collect();
        tracing::debug!(
            "Comparing {} incoming keys with {} stored keys in {}",
            tuples.len(),
            existing.len(),
            table
        );

        Ok(tuples
            .iter()
            .filter_map(|tuple| comparable_tuple(tuple, key))
            .filter(|tuple| existing.contains(tuple))
            .count() as u64)
    }

    /// Query pushdown over one set of tuples
    pub async fn count_pushdown(
        &self,
        table: &str,
        key: &[KeyColumn],
        tuples: &[Vec<Value>],
    ) -> ConsolidationResult<u64> {
        Ok(pushdown_count(
            self.backend.as_ref(),
            table,
            key,
            tuples,
            self.pushdown_batch_rows,
        )
        .await?)
    }

    /// Query pushdown over chunks on the bounded scan pool
    ///
    /// At most `scan_workers` chunks are scanned at once. The first failing
    /// scan aborts the others. Dropping the returned future aborts every
    /// scan still in flight.
    ///
    /// # Returns
    /// Total matches across all chunks
    pub async fn count_chunks(
        &self,
        table: &str,
        key: &[KeyColumn],
        chunks: Vec<Vec<Vec<Value>>>,
    ) -> ConsolidationResult<u64> {
        if key.is_empty() {
            return Ok(0);
        }
        let key: Arc<[KeyColumn]> = key.into();
        let table: Arc<str> = table.into();
        let semaphore = Arc::new(Semaphore::new(self.scan_workers));
        let mut scans: JoinSet<DatabaseResult<u64>> = JoinSet::new();
        let chunk_count = chunks.len();

        for tuples in chunks {
            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                DatabaseError::QueryFailed(format!("Scan semaphore closed: {}", e))
            })?;
            let backend = self.backend.clone();
            let key = key.clone();
            let table = table.clone();
            let batch_rows = self.pushdown_batch_rows;

            scans.spawn(async move {
                let _permit = permit;
                pushdown_count(backend.as_ref(), &table, &key, &tuples, batch_rows).await
            });
        }

        let mut matches = 0;
        while let Some(joined) = scans.join_next().await {
            match joined {
                Ok(Ok(count)) => matches += count,
                Ok(Err(err)) => {
                    scans.abort_all();
                    return Err(err.into());
                }
                Err(join_err) => {
                    scans.abort_all();
                    return Err(DatabaseError::QueryFailed(format!(
                        "Duplicate scan task failed: {}",
                        join_err
                    ))
                    .into());
                }
            }
        }
        tracing::debug!(
            "Scanned {} chunks of {} with {} workers: {} matches",
            chunk_count,
            table,
            self.scan_workers,
            matches
        );
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryBackend, StoreOperation};
    use crate::models::ColumnType;
    use std::time::Duration;

    fn schema() -> TableSchema {
        TableSchema::from_pairs([("email", ColumnType::Text), ("age", ColumnType::Integer)])
            .unwrap()
    }

    fn seeded() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed_table(
                "contacts",
                &[("email", "TEXT"), ("age", "NUMERIC")],
                vec![
                    vec![Value::from("a@x.com"), Value::Float(30.0)],
                    vec![Value::from("c@x.com"), Value::Null],
                ],
            )
            .unwrap();
        backend
    }

    #[test]
    fn test_resolve_key_drops_unknown_columns() {
        let policy = DuplicateCheckPolicy::default().with_uniqueness_columns(["email", "phone"]);
        let key = resolve_key(&policy, &schema(), "contacts");
        assert_eq!(key.columns, vec![KeyColumn::new("email", KeyKind::Text)]);
        assert_eq!(key.warnings.len(), 1);
    }

    #[test]
    fn test_resolve_key_without_usable_columns_is_empty() {
        let policy = DuplicateCheckPolicy::default().with_uniqueness_columns(["phone"]);
        let key = resolve_key(&policy, &schema(), "contacts");
        assert!(key.is_empty());
        assert_eq!(key.warnings.len(), 2);
    }

    #[test]
    fn test_resolve_key_defaults_to_all_columns() {
        let key = resolve_key(&DuplicateCheckPolicy::default(), &schema(), "contacts");
        assert_eq!(key.columns.len(), 2);
        assert_eq!(key.columns[1].kind, KeyKind::Integer);
    }

    #[test]
    fn test_tuples_skip_missing_components() {
        let key = resolve_key(&DuplicateCheckPolicy::default(), &schema(), "contacts");
        let rows = vec![
            vec![Value::from("a@x.com"), Value::Int(1)],
            vec![Value::from("b@x.com"), Value::Null],
            vec![Value::from("  "), Value::Int(2)],
        ];
        assert_eq!(key.tuples(&rows).len(), 1);
    }

    #[test]
    fn test_count_intra_batch() {
        let key = vec![KeyColumn::new("age", KeyKind::Numeric)];
        let tuples = vec![
            vec![Value::Int(30)],
            vec![Value::Float(30.0)],
            vec![Value::Int(31)],
            vec![Value::from("30")],
        ];
        assert_eq!(count_intra_batch(&tuples, &key), 2);
    }

    #[tokio::test]
    async fn test_file_check_round_trip() {
        let detector = DuplicateDetector::new(seeded());
        detector.check_file("contacts", "abc").await.unwrap();
        detector.record_file("contacts", "abc", 2).await.unwrap();
        detector.record_file("contacts", "abc", 2).await.unwrap();

        let err = detector.check_file("contacts", "abc").await.unwrap_err();
        assert!(matches!(err, ConsolidationError::FileAlreadyImported { .. }));
        detector.check_file("other", "abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_and_pushdown_agree() {
        let detector = DuplicateDetector::new(seeded()).with_pushdown_batch_rows(1);
        let key = vec![KeyColumn::new("age", KeyKind::Numeric)];
        let tuples = vec![vec![Value::Int(30)], vec![Value::from("30.0")], vec![Value::Int(7)]];

        let direct = detector.count_direct("contacts", &key, &tuples).await.unwrap();
        let pushdown = detector.count_pushdown("contacts", &key, &tuples).await.unwrap();
        assert_eq!(direct, 2);
        assert_eq!(pushdown, 2);
    }

    #[tokio::test]
    async fn test_null_keys_never_match() {
        let detector = DuplicateDetector::new(seeded());
        let key = vec![
            KeyColumn::new("email", KeyKind::Text),
            KeyColumn::new("age", KeyKind::Numeric),
        ];
        let tuples = vec![vec![Value::from("c@x.com"), Value::Null]];
        assert_eq!(detector.count_direct("contacts", &key, &tuples).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pushdown_respects_batch_size() {
        let backend = seeded();
        let detector = DuplicateDetector::new(backend.clone()).with_pushdown_batch_rows(2);
        let key = vec![KeyColumn::new("email", KeyKind::Text)];
        let tuples: Vec<Vec<Value>> = (0..5)
            .map(|i| vec![Value::from(format!("{}@x.com", i))])
            .collect();
        backend.clear_operations();

        detector.count_pushdown("contacts", &key, &tuples).await.unwrap();
        let scans: Vec<usize> = backend
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                StoreOperation::KeyScan { tuples, .. } => Some(tuples),
                _ => None,
            })
            .collect();
        assert_eq!(scans, vec![2, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_scans_are_bounded() {
        let backend = Arc::new(
            MemoryBackend::new().with_scan_latency(Duration::from_millis(50)),
        );
        backend
            .seed_table(
                "contacts",
                &[("email", "TEXT")],
                vec![vec![Value::from("a@x.com")]],
            )
            .unwrap();
        let detector = DuplicateDetector::new(backend.clone()).with_scan_workers(2);
        let key = vec![KeyColumn::new("email", KeyKind::Text)];
        let chunks: Vec<Vec<Vec<Value>>> = (0..6)
            .map(|_| vec![vec![Value::from("a@x.com")]])
            .collect();

        let matches = detector.count_chunks("contacts", &key, chunks).await.unwrap();
        assert_eq!(matches, 6);
        assert_eq!(backend.peak_concurrent_scans(), 2);
    }

    #[tokio::test]
    async fn test_chunk_scan_error_propagates() {
        let detector = DuplicateDetector::new(Arc::new(MemoryBackend::new()));
        let key = vec![KeyColumn::new("email", KeyKind::Text)];
        let result = detector
            .count_chunks("missing", &key, vec![vec![vec![Value::from("a")]]])
            .await;
        assert!(matches!(result, Err(ConsolidationError::Database(_))));
    }
}
