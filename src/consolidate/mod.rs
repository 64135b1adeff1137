//! Consolidation orchestrator
//!
//! [`Consolidator::consolidate`] sequences one import:
//!
//! 1. hash the raw bytes and reject files already imported into the table
//! 2. ensure the target table exists in a usable shape
//! 3. map incoming columns onto the table
//! 4. transform and coerce every record (in parallel)
//! 5. check for duplicate rows and commit, either directly or in chunks
//!
//! Small batches take the direct path: one in-memory key comparison and one
//! transactional insert. Batches above the chunk threshold are scanned
//! concurrently with pushdown queries and then committed chunk by chunk, in
//! order, through the store's bulk-load path.

pub mod cache;

pub use cache::RecordsCache;

use chrono::Utc;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::coercion::{CoercionWarning, DateNormalizer, IsoDateNormalizer, try_coerce};
use crate::database::config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_THRESHOLD, DEFAULT_PUSHDOWN_BATCH_ROWS,
    DEFAULT_SCAN_WORKERS, ImportSection,
};
use crate::database::{ConsolidationConfig, DatabaseBackend, OpenedStore, open_backend};
use crate::duplicates::{
    DuplicateDetector, DuplicateReport, FileHasher, ResolvedKey, Sha256Hasher, count_intra_batch,
    resolve_key,
};
use crate::error::{ConsolidationError, ConsolidationResult, ImportPhase};
use crate::lifecycle::{EnsuredTable, TableLocks, TableManager};
use crate::models::{
    ColumnType, ConsolidationPath, ImportOutcome, ImportStatus, Record, TableAction, TableSchema,
    TargetDescriptor, Value, WarningLog,
};
use crate::reconcile::{ColumnProjection, ReconciliationResult, reconcile};
use crate::tracking::{HistoryStatus, ImportCompletion, ImportStart, ImportTracker, NoopTracker};

/// Tuning for the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationSettings {
    /// Record count above which the chunked path is taken
    pub chunk_threshold: usize,
    pub chunk_size: usize,
    pub scan_workers: usize,
    pub pushdown_batch_rows: usize,
    pub max_warnings: usize,
    /// Deadline applied by [`Consolidator::consolidate`]
    pub deadline: Option<Duration>,
    /// Serialize imports into the same table within this process
    pub lock_tables: bool,
}

impl Default for ConsolidationSettings {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            scan_workers: DEFAULT_SCAN_WORKERS,
            pushdown_batch_rows: DEFAULT_PUSHDOWN_BATCH_ROWS,
            max_warnings: 1_000,
            deadline: None,
            lock_tables: true,
        }
    }
}

impl From<&ImportSection> for ConsolidationSettings {
    fn from(section: &ImportSection) -> Self {
        Self {
            chunk_threshold: section.chunk_threshold,
            chunk_size: section.chunk_size,
            scan_workers: section.scan_workers,
            pushdown_batch_rows: section.pushdown_batch_rows,
            max_warnings: section.max_warnings,
            deadline: section.deadline(),
            lock_tables: section.lock_tables,
        }
    }
}

/// Rows ready to be written, plus what the import learned on the way
struct PreparedBatch {
    schema: TableSchema,
    rows: Vec<Vec<Value>>,
    table_action: TableAction,
    /// Uniqueness key, or `None` when the row-level check does not run
    key: Option<ResolvedKey>,
    file_hash: Option<String>,
    warnings: WarningLog,
}

/// Result of the write paths before it becomes an [`ImportOutcome`]
struct Committed {
    rows: usize,
    report: DuplicateReport,
    counted_duplicates: u64,
    status: ImportStatus,
    path: ConsolidationPath,
}

/// Entry point of the consolidation engine
pub struct Consolidator {
    backend: Arc<dyn DatabaseBackend>,
    tracker: Arc<dyn ImportTracker>,
    hasher: Arc<dyn FileHasher>,
    date_normalizer: Arc<dyn DateNormalizer>,
    cache: Option<Arc<RecordsCache>>,
    settings: ConsolidationSettings,
    tables: TableManager,
    detector: DuplicateDetector,
    import_locks: TableLocks,
}

impl Consolidator {
    /// Create an orchestrator over a store with default settings
    pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
        let settings = ConsolidationSettings::default();
        Self {
            tables: TableManager::new(backend.clone()),
            detector: Self::detector(&backend, &settings),
            backend,
            tracker: Arc::new(NoopTracker),
            hasher: Arc::new(Sha256Hasher),
            date_normalizer: Arc::new(IsoDateNormalizer::new()),
            cache: None,
            settings,
            import_locks: TableLocks::default(),
        }
    }

    /// Create an orchestrator over an opened store, tuned by configuration
    pub fn from_store(store: OpenedStore, config: &ConsolidationConfig) -> Self {
        let consolidator = Self::new(store.backend)
            .with_tracker(store.tracker)
            .with_settings(ConsolidationSettings::from(&config.import));
        if config.cache.enabled {
            consolidator.with_cache(Arc::new(RecordsCache::from_section(&config.cache)))
        } else {
            consolidator
        }
    }

    /// Open the configured store and build an orchestrator over it
    ///
    /// # Arguments
    /// * `config` - Loaded configuration
    /// * `workspace_path` - Directory relative DuckDB paths resolve against
    pub async fn from_config(
        config: &ConsolidationConfig,
        workspace_path: &Path,
    ) -> ConsolidationResult<Self> {
        let store = open_backend(config, workspace_path).await?;
        Ok(Self::from_store(store, config))
    }

    fn detector(
        backend: &Arc<dyn DatabaseBackend>,
        settings: &ConsolidationSettings,
    ) -> DuplicateDetector {
        DuplicateDetector::new(backend.clone())
            .with_scan_workers(settings.scan_workers)
            .with_pushdown_batch_rows(settings.pushdown_batch_rows)
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ImportTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn FileHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Replace the TIMESTAMP normalizer (month-first [`IsoDateNormalizer`] by default)
    pub fn with_date_normalizer(mut self, normalizer: Arc<dyn DateNormalizer>) -> Self {
        self.date_normalizer = normalizer;
        self
    }

    /// Keep records of hashed files so rejected imports can be re-run
    pub fn with_cache(mut self, cache: Arc<RecordsCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_settings(mut self, settings: ConsolidationSettings) -> Self {
        let settings = ConsolidationSettings {
            chunk_size: settings.chunk_size.max(1),
            scan_workers: settings.scan_workers.max(1),
            pushdown_batch_rows: settings.pushdown_batch_rows.max(1),
            ..settings
        };
        self.detector = Self::detector(&self.backend, &settings);
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ConsolidationSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<dyn DatabaseBackend> {
        &self.backend
    }

    pub fn cache(&self) -> Option<&Arc<RecordsCache>> {
        self.cache.as_ref()
    }

    /// See [`TableManager::ensure_table`]
    pub async fn ensure_table(
        &self,
        descriptor: &TargetDescriptor,
    ) -> ConsolidationResult<EnsuredTable> {
        self.tables.ensure_table(descriptor).await
    }

    /// See [`TableManager::add_columns`]
    pub async fn add_columns(
        &self,
        table: &str,
        columns: &[String],
    ) -> ConsolidationResult<Vec<String>> {
        self.tables.add_columns(table, columns).await
    }

    /// Reconcile incoming column names with an existing table's columns
    ///
    /// Returns `None` when the table does not exist.
    pub async fn reconcile(
        &self,
        table: &str,
        source: &[String],
    ) -> ConsolidationResult<Option<ReconciliationResult>> {
        let stored = self.backend.table_columns(table).await?;
        if stored.is_empty() {
            return Ok(None);
        }
        let target: Vec<String> = stored
            .into_iter()
            .filter(|c| !c.is_row_id())
            .map(|c| c.name)
            .collect();
        Ok(Some(reconcile(source, &target)))
    }

    /// Consolidate a batch of records into the descriptor's table
    ///
    /// The configured default deadline applies, if any.
    ///
    /// # Arguments
    /// * `descriptor` - Target table, schema, mapping and duplicate policy
    /// * `records` - Parsed records
    /// * `raw_bytes` - The file the records were parsed from, for file-level
    ///   duplicate detection
    pub async fn consolidate(
        &self,
        descriptor: &TargetDescriptor,
        records: &[Record],
        raw_bytes: Option<&[u8]>,
    ) -> ConsolidationResult<ImportOutcome> {
        let deadline = self.settings.deadline.map(|d| Instant::now() + d);
        let file_hash = raw_bytes.map(|bytes| self.hash_and_cache(bytes, records));
        self.run(descriptor, records, file_hash, deadline).await
    }

    /// [`Consolidator::consolidate`] with an explicit deadline
    ///
    /// A deadline passing before anything is written fails with
    /// [`ConsolidationError::DeadlineExceeded`]. Passing it between chunk
    /// commits keeps the committed chunks and reports
    /// [`ImportStatus::PartiallyCommitted`].
    pub async fn consolidate_with_deadline(
        &self,
        descriptor: &TargetDescriptor,
        records: &[Record],
        raw_bytes: Option<&[u8]>,
        deadline: Duration,
    ) -> ConsolidationResult<ImportOutcome> {
        let deadline = Instant::now() + deadline;
        let file_hash = raw_bytes.map(|bytes| self.hash_and_cache(bytes, records));
        self.run(descriptor, records, file_hash, Some(deadline)).await
    }

    /// Re-run an import from records cached under a file hash
    pub async fn consolidate_cached(
        &self,
        descriptor: &TargetDescriptor,
        file_hash: &str,
    ) -> ConsolidationResult<ImportOutcome> {
        let records = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(file_hash))
            .ok_or_else(|| ConsolidationError::NotCached(file_hash.to_string()))?;
        let deadline = self.settings.deadline.map(|d| Instant::now() + d);
        self.run(descriptor, &records, Some(file_hash.to_string()), deadline)
            .await
    }

    fn hash_and_cache(&self, bytes: &[u8], records: &[Record]) -> String {
        let file_hash = self.hasher.hash(bytes);
        if let Some(cache) = &self.cache {
            cache.insert(file_hash.clone(), Arc::new(records.to_vec()));
        }
        file_hash
    }

    async fn run(
        &self,
        descriptor: &TargetDescriptor,
        records: &[Record],
        file_hash: Option<String>,
        deadline: Option<Instant>,
    ) -> ConsolidationResult<ImportOutcome> {
        descriptor.validate()?;
        let table = descriptor.table_name.as_str();
        let _import_guard = if self.settings.lock_tables {
            Some(self.import_locks.acquire(table).await?)
        } else {
            None
        };

        let started = Instant::now();
        let start = ImportStart {
            table_name: table.to_string(),
            file_hash: file_hash.clone(),
            records_received: records.len(),
            started_at: Utc::now(),
        };
        let import_id = match self.tracker.record_import_start(&start).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Failed to record import start for {}: {}", table, e);
                Uuid::new_v4()
            }
        };

        let result = self.import(descriptor, records, file_hash, deadline).await;
        let result = result.map(|(batch, committed)| {
            let (warnings, warnings_truncated) = batch.warnings.into_parts();
            ImportOutcome {
                import_id,
                table_name: table.to_string(),
                records_received: records.len(),
                records_processed: committed.rows,
                duplicates_found: committed.counted_duplicates,
                intra_batch_duplicates: committed.report.intra_batch,
                status: committed.status,
                path: committed.path,
                table_action: batch.table_action,
                file_hash: batch.file_hash,
                warnings,
                warnings_truncated,
                duration_ms: started.elapsed().as_millis() as u64,
            }
        });

        self.record_completion(import_id, table, &result).await;
        result
    }

    async fn record_completion(
        &self,
        import_id: Uuid,
        table: &str,
        result: &ConsolidationResult<ImportOutcome>,
    ) {
        let completion = match result {
            Ok(outcome) => ImportCompletion {
                status: match outcome.status {
                    ImportStatus::Completed => HistoryStatus::Completed,
                    ImportStatus::PartiallyCommitted { .. } => HistoryStatus::PartiallyCommitted,
                },
                records_processed: outcome.records_processed,
                duplicates_found: outcome.duplicates_found,
                message: None,
                completed_at: Utc::now(),
            },
            Err(err) => {
                let (status, duplicates_found, records_processed) = match err {
                    ConsolidationError::FileAlreadyImported { .. } => {
                        (HistoryStatus::Rejected, 0, 0)
                    }
                    ConsolidationError::DuplicateData { count, .. } => {
                        (HistoryStatus::Rejected, *count, 0)
                    }
                    ConsolidationError::ChunkCommitFailed { rows_committed, .. } => {
                        (HistoryStatus::Failed, 0, *rows_committed as usize)
                    }
                    _ => (HistoryStatus::Failed, 0, 0),
                };
                ImportCompletion {
                    status,
                    records_processed,
                    duplicates_found,
                    message: Some(err.to_string()),
                    completed_at: Utc::now(),
                }
            }
        };

        if let Err(e) = self
            .tracker
            .record_import_complete(import_id, &completion)
            .await
        {
            tracing::warn!("Failed to record import completion for {}: {}", table, e);
        }
    }

    async fn import(
        &self,
        descriptor: &TargetDescriptor,
        records: &[Record],
        file_hash: Option<String>,
        deadline: Option<Instant>,
    ) -> ConsolidationResult<(PreparedBatch, Committed)> {
        let batch = self.prepare(descriptor, records, file_hash).await?;
        let committed = if batch.rows.len() > self.settings.chunk_threshold {
            self.commit_chunked(descriptor, &batch, deadline).await?
        } else {
            self.commit_direct(descriptor, &batch, deadline).await?
        };
        Ok((batch, committed))
    }

    /// Steps 1–4: file check, table, mapping, coercion
    async fn prepare(
        &self,
        descriptor: &TargetDescriptor,
        records: &[Record],
        file_hash: Option<String>,
    ) -> ConsolidationResult<PreparedBatch> {
        let table = descriptor.table_name.as_str();
        let mut warnings = WarningLog::new(self.settings.max_warnings);

        // before any DDL, so a rejected file never recreates the table
        if let Some(hash) = &file_hash
            && descriptor.policy.file_check_active()
        {
            self.detector.check_file(table, hash).await?;
        }

        let ensured = self.tables.ensure_table(descriptor).await?;
        let mapping = self.column_mapping(descriptor, &ensured.schema, records, &mut warnings);
        let rows = self.coerce_rows(records, &mapping, &ensured.schema, &mut warnings);

        let key = if descriptor.policy.row_check_active() {
            let key = resolve_key(&descriptor.policy, &ensured.schema, table);
            warnings.extend(key.warnings.iter().cloned());
            (!key.is_empty()).then_some(key)
        } else {
            tracing::debug!("Row-level duplicate check disabled for {}", table);
            None
        };

        Ok(PreparedBatch {
            schema: ensured.schema,
            rows,
            table_action: ensured.action,
            key,
            file_hash,
            warnings,
        })
    }

    fn column_mapping(
        &self,
        descriptor: &TargetDescriptor,
        schema: &TableSchema,
        records: &[Record],
        warnings: &mut WarningLog,
    ) -> BTreeMap<String, String> {
        let table = descriptor.table_name.as_str();
        let source = source_columns(records);

        let (mapping, unmapped) = match &descriptor.column_mapping {
            Some(mapping) => {
                let mut kept = BTreeMap::new();
                for (source_column, target) in mapping {
                    if schema.contains(target) {
                        kept.insert(source_column.clone(), target.clone());
                    } else {
                        warnings.push(format!(
                            "Mapped column '{}' is not in table '{}'; '{}' was dropped",
                            target, table, source_column
                        ));
                    }
                }
                let unmapped: Vec<String> = source
                    .into_iter()
                    .filter(|column| !mapping.contains_key(column))
                    .collect();
                (kept, unmapped)
            }
            None => {
                let result = reconcile(&source, &schema.column_names());
                tracing::debug!(
                    "Reconciled {} source columns with {}: {:.1}% matched, {} unmatched targets",
                    result.column_mapping.len() + result.new_columns.len(),
                    table,
                    result.match_percentage,
                    result.unmatched_targets.len()
                );
                (result.column_mapping, result.new_columns)
            }
        };

        for column in unmapped {
            warnings.push(format!(
                "Column '{}' has no match in table '{}' and was dropped",
                column, table
            ));
        }
        mapping
    }

    fn coerce_rows(
        &self,
        records: &[Record],
        mapping: &BTreeMap<String, String>,
        schema: &TableSchema,
        warnings: &mut WarningLog,
    ) -> Vec<Vec<Value>> {
        let projection = ColumnProjection::new(mapping, schema);
        let normalizer = self.date_normalizer.as_ref();

        let coerced: Vec<(Vec<Value>, Vec<String>)> = records
            .par_iter()
            .enumerate()
            .map(|(index, record)| coerce_row(&projection.project(record), schema, normalizer, index))
            .collect();

        let mut rows = Vec::with_capacity(coerced.len());
        for (row, row_warnings) in coerced {
            warnings.extend(row_warnings);
            rows.push(row);
        }
        rows
    }

    /// Whether stored rows can collide with incoming ones
    async fn table_has_rows(&self, table: &str, action: TableAction) -> ConsolidationResult<bool> {
        if action.is_fresh() {
            return Ok(false);
        }
        Ok(self.backend.row_count(table).await? > 0)
    }

    fn reject_duplicates(
        &self,
        descriptor: &TargetDescriptor,
        counted: u64,
        report: &DuplicateReport,
        total: usize,
    ) -> ConsolidationResult<()> {
        if counted == 0 || !descriptor.policy.duplicates_are_fatal() {
            return Ok(());
        }
        let mut message = format!(
            "{} of {} incoming rows already exist in table '{}'",
            report.existing, total, descriptor.table_name
        );
        if descriptor.policy.include_intra_batch && report.intra_batch > 0 {
            message.push_str(&format!(
                " and {} repeat earlier rows of the batch",
                report.intra_batch
            ));
        }
        tracing::info!("Rejecting import into {}: {}", descriptor.table_name, message);
        Err(ConsolidationError::DuplicateData {
            count: counted,
            message,
        })
    }

    async fn record_file(&self, batch: &PreparedBatch, table: &str, rows: usize) {
        if let Some(hash) = &batch.file_hash
            && let Err(e) = self.detector.record_file(table, hash, rows as u64).await
        {
            tracing::warn!("Failed to record file {} for {}: {}", hash, table, e);
        }
    }

    async fn commit_direct(
        &self,
        descriptor: &TargetDescriptor,
        batch: &PreparedBatch,
        deadline: Option<Instant>,
    ) -> ConsolidationResult<Committed> {
        let table = descriptor.table_name.as_str();
        let mut report = DuplicateReport::default();

        if let Some(key) = &batch.key {
            let tuples = key.tuples(&batch.rows);
            report.intra_batch = count_intra_batch(&tuples, &key.columns);
            if self.table_has_rows(table, batch.table_action).await? {
                let scan = self.detector.count_direct(table, &key.columns, &tuples);
                report.existing = within_deadline(deadline, ImportPhase::DirectInsert, scan).await??;
            }
        }
        let counted = report.counted(&descriptor.policy);
        self.reject_duplicates(descriptor, counted, &report, batch.rows.len())?;

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ConsolidationError::DeadlineExceeded {
                phase: ImportPhase::DirectInsert,
            });
        }

        let inserted = self
            .backend
            .insert_rows(table, batch.schema.columns(), &batch.rows)
            .await? as usize;
        tracing::info!("Inserted {} rows into {}", inserted, table);
        self.record_file(batch, table, inserted).await;

        Ok(Committed {
            rows: inserted,
            report,
            counted_duplicates: counted,
            status: ImportStatus::Completed,
            path: ConsolidationPath::Direct,
        })
    }

    async fn commit_chunked(
        &self,
        descriptor: &TargetDescriptor,
        batch: &PreparedBatch,
        deadline: Option<Instant>,
    ) -> ConsolidationResult<Committed> {
        let table = descriptor.table_name.as_str();
        let chunk_size = self.settings.chunk_size;
        let chunks: Vec<&[Vec<Value>]> = batch.rows.chunks(chunk_size).collect();
        let chunks_total = chunks.len();
        let mut report = DuplicateReport::default();

        // phase 1: read-only scans against the table as committed now
        if let Some(key) = &batch.key {
            let chunk_tuples: Vec<Vec<Vec<Value>>> =
                chunks.iter().map(|chunk| key.tuples(chunk)).collect();
            let all_tuples: Vec<Vec<Value>> = chunk_tuples.iter().flatten().cloned().collect();
            report.intra_batch = count_intra_batch(&all_tuples, &key.columns);

            if self.table_has_rows(table, batch.table_action).await? {
                let scan = self.detector.count_chunks(table, &key.columns, chunk_tuples);
                report.existing = within_deadline(deadline, ImportPhase::DuplicateScan, scan).await??;
            }
        }
        let counted = report.counted(&descriptor.policy);
        self.reject_duplicates(descriptor, counted, &report, batch.rows.len())?;

        // phase 2: sequential commits in chunk order
        let mut rows_committed = 0u64;
        for (index, chunk) in chunks.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                if index == 0 {
                    return Err(ConsolidationError::DeadlineExceeded {
                        phase: ImportPhase::ChunkCommit,
                    });
                }
                tracing::warn!(
                    "Deadline passed after {} of {} chunks for {}",
                    index,
                    chunks_total,
                    table
                );
                return Ok(Committed {
                    rows: rows_committed as usize,
                    report,
                    counted_duplicates: counted,
                    status: ImportStatus::PartiallyCommitted {
                        chunks_committed: index,
                        chunks_total,
                    },
                    path: ConsolidationPath::Chunked {
                        chunks: chunks_total,
                        chunk_size,
                    },
                });
            }

            let loaded = self
                .backend
                .bulk_load(table, batch.schema.columns(), chunk)
                .await
                .map_err(|source| ConsolidationError::ChunkCommitFailed {
                    chunk: index + 1,
                    chunks_committed: index,
                    rows_committed,
                    source,
                })?;
            rows_committed += loaded;
            tracing::info!(
                "Committed chunk {}/{} ({} rows) into {}",
                index + 1,
                chunks_total,
                loaded,
                table
            );
        }

        self.record_file(batch, table, rows_committed as usize).await;
        Ok(Committed {
            rows: rows_committed as usize,
            report,
            counted_duplicates: counted,
            status: ImportStatus::Completed,
            path: ConsolidationPath::Chunked {
                chunks: chunks_total,
                chunk_size,
            },
        })
    }
}

/// Source columns in first-seen order across the batch
fn source_columns(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for record in records {
        for column in record.columns() {
            if seen.insert(column) {
                columns.push(column.to_string());
            }
        }
    }
    columns
}

/// Coerce one projected row, normalizing TIMESTAMP values first
///
/// A TIMESTAMP value the normalizer rejects becomes `Null` with a warning,
/// so the store never receives text it cannot cast.
fn coerce_row(
    values: &[Value],
    schema: &TableSchema,
    normalizer: &dyn DateNormalizer,
    index: usize,
) -> (Vec<Value>, Vec<String>) {
    let mut warnings = Vec::new();
    let row = values
        .iter()
        .zip(schema.columns())
        .map(|(value, column)| {
            let coerced = if column.column_type == ColumnType::Timestamp && !value.is_missing() {
                normalizer.normalize_date(value).map(Value::Timestamp).ok_or_else(|| {
                    CoercionWarning::new(value, ColumnType::Timestamp, "not a recognised date or time")
                })
            } else {
                try_coerce(value, column.column_type)
            };

            coerced.unwrap_or_else(|warning| {
                let message = warning.for_column(&column.name, index + 1);
                tracing::warn!("{}", message);
                warnings.push(message);
                Value::Null
            })
        })
        .collect();
    (row, warnings)
}

/// Run `future` unless the deadline passes first
async fn within_deadline<F: std::future::Future>(
    deadline: Option<Instant>,
    phase: ImportPhase,
    future: F,
) -> ConsolidationResult<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| {
                tracing::warn!("Deadline exceeded during {}", phase);
                ConsolidationError::DeadlineExceeded { phase }
            }),
        None => Ok(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryBackend;
    use crate::models::DuplicateCheckPolicy;

    fn contacts() -> TargetDescriptor {
        TargetDescriptor::new(
            "contacts",
            TableSchema::from_pairs([("email", ColumnType::Text), ("age", ColumnType::Integer)])
                .unwrap(),
        )
    }

    fn record(email: &str, age: impl Into<Value>) -> Record {
        Record::new().with("email", email).with("age", age)
    }

    #[test]
    fn test_source_columns_first_seen_order() {
        let records = vec![
            Record::new().with("b", 1).with("a", 2),
            Record::new().with("a", 3).with("c", 4),
        ];
        assert_eq!(source_columns(&records), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_coerce_row_reports_row_and_column() {
        let schema = contacts().schema;
        let (row, warnings) = coerce_row(
            &[Value::from("a@x.com"), Value::from("thirty")],
            &schema,
            &IsoDateNormalizer::new(),
            4,
        );
        assert_eq!(row, vec![Value::from("a@x.com"), Value::Null]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("row 5, column 'age'"));
    }

    #[test]
    fn test_unrecognised_timestamp_becomes_null() {
        let schema =
            TableSchema::from_pairs([("at", ColumnType::Timestamp), ("note", ColumnType::Text)])
                .unwrap();
        let (row, warnings) = coerce_row(
            &[Value::from("not a date"), Value::from("x")],
            &schema,
            &IsoDateNormalizer::new(),
            0,
        );
        assert_eq!(row, vec![Value::Null, Value::from("x")]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("row 1, column 'at'"));

        let (row, warnings) = coerce_row(
            &[Value::from("2024-01-01T10:00:00+02:00"), Value::Null],
            &schema,
            &IsoDateNormalizer::new(),
            0,
        );
        assert_eq!(row[0], Value::Timestamp("2024-01-01T08:00:00".to_string()));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_settings_from_config_section() {
        let section = ImportSection {
            chunk_size: 500,
            deadline_secs: Some(30),
            ..ImportSection::default()
        };
        let settings = ConsolidationSettings::from(&section);
        assert_eq!(settings.chunk_size, 500);
        assert_eq!(settings.deadline, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_direct_import_creates_table() {
        let backend = Arc::new(MemoryBackend::new());
        let consolidator = Consolidator::new(backend.clone());
        let outcome = consolidator
            .consolidate(
                &contacts(),
                &[record("a@x.com", "30"), record("b@x.com", 31)],
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.table_action, TableAction::Created);
        assert_eq!(outcome.records_processed, 2);
        assert_eq!(outcome.path, ConsolidationPath::Direct);
        assert_eq!(
            backend.column_values("contacts", "age").unwrap(),
            vec![Value::Int(30), Value::Int(31)]
        );
    }

    #[tokio::test]
    async fn test_unmatched_source_columns_warn() {
        let backend = Arc::new(MemoryBackend::new());
        let consolidator = Consolidator::new(backend);
        let outcome = consolidator
            .consolidate(
                &contacts(),
                &[record("a@x.com", 1).with("Phone", "555")],
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("'Phone'"));
    }

    #[tokio::test]
    async fn test_case_insensitive_reconciliation() {
        let backend = Arc::new(MemoryBackend::new());
        let consolidator = Consolidator::new(backend.clone());
        consolidator
            .consolidate(
                &contacts(),
                &[Record::new().with("EMAIL", "a@x.com").with("Age", 5)],
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            backend.column_values("contacts", "email").unwrap(),
            vec![Value::from("a@x.com")]
        );
    }

    #[tokio::test]
    async fn test_warning_cap() {
        let backend = Arc::new(MemoryBackend::new());
        let consolidator = Consolidator::new(backend).with_settings(ConsolidationSettings {
            max_warnings: 2,
            ..ConsolidationSettings::default()
        });
        let records: Vec<Record> = (0..5).map(|i| record(&format!("{}@x.com", i), "x")).collect();
        let outcome = consolidator
            .consolidate(&contacts(), &records, None)
            .await
            .unwrap();
        assert_eq!(outcome.warnings.len(), 2);
        assert_eq!(outcome.warnings_truncated, 3);
    }

    #[tokio::test]
    async fn test_intra_batch_counted_when_enabled() {
        let backend = Arc::new(MemoryBackend::new());
        let consolidator = Consolidator::new(backend);
        let descriptor = contacts().with_policy(
            DuplicateCheckPolicy::default()
                .with_uniqueness_columns(["email"])
                .counting_intra_batch(),
        );
        let err = consolidator
            .consolidate(
                &descriptor,
                &[record("a@x.com", 1), record("a@x.com", 2)],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::DuplicateData { count: 1, .. }));
    }

    #[tokio::test]
    async fn test_intra_batch_reported_but_not_counted_by_default() {
        let backend = Arc::new(MemoryBackend::new());
        let consolidator = Consolidator::new(backend);
        let descriptor = contacts()
            .with_policy(DuplicateCheckPolicy::default().with_uniqueness_columns(["email"]));
        let outcome = consolidator
            .consolidate(
                &descriptor,
                &[record("a@x.com", 1), record("a@x.com", 2)],
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.duplicates_found, 0);
        assert_eq!(outcome.intra_batch_duplicates, 1);
        assert_eq!(outcome.records_processed, 2);
    }

    #[tokio::test]
    async fn test_reconcile_passthrough() {
        let backend = Arc::new(MemoryBackend::new());
        let consolidator = Consolidator::new(backend);
        assert!(
            consolidator
                .reconcile("contacts", &["email".to_string()])
                .await
                .unwrap()
                .is_none()
        );
        consolidator.ensure_table(&contacts()).await.unwrap();
        let result = consolidator
            .reconcile("contacts", &["Email".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.column_mapping.get("Email").map(String::as_str), Some("email"));
        assert_eq!(result.unmatched_targets, vec!["age"]);
    }

    #[tokio::test]
    async fn test_not_cached() {
        let consolidator = Consolidator::new(Arc::new(MemoryBackend::new()));
        let err = consolidator
            .consolidate_cached(&contacts(), "abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::NotCached(_)));
    }
}
