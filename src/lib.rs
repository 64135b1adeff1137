//! Data Consolidation SDK - Engine for loading heterogeneous tabular records
//! into a shared relational warehouse
//!
//! Provides unified interfaces for:
//! - Type coercion of raw scalars into declared column types
//! - Schema reconciliation between incoming and stored columns
//! - Table lifecycle (create, recreate, extend)
//! - File-level and row-level duplicate detection
//! - Direct and chunked consolidation with deadlines
//! - DuckDB, PostgreSQL and in-memory stores

pub mod coercion;
pub mod consolidate;
pub mod database;
pub mod duplicates;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod reconcile;
pub mod tracking;
pub mod validation;

// Re-export commonly used types
pub use consolidate::{ConsolidationSettings, Consolidator, RecordsCache};
pub use error::{ConsolidationError, ConsolidationResult, ImportPhase};
pub use lifecycle::{EnsuredTable, TableManager};

pub use coercion::{CoercionWarning, DateNormalizer, IsoDateNormalizer, coerce, try_coerce};
pub use duplicates::{DuplicateDetector, FileHasher, Sha256Hasher};
pub use reconcile::{ReconciliationResult, reconcile, transform_record};
pub use tracking::{ImportTracker, NoopTracker};

#[cfg(feature = "duckdb-backend")]
pub use database::DuckDBBackend;
#[cfg(feature = "postgres-backend")]
pub use database::PostgresBackend;
pub use database::{
    ConsolidationConfig, DatabaseBackend, DatabaseBackendType, DatabaseError, DatabaseResult,
    MemoryBackend, OpenedStore, open_backend,
};

// Re-export models
pub use models::enums::*;
pub use models::{
    Column, DuplicateCheckPolicy, ImportOutcome, ImportStatus, Record, TableSchema,
    TargetDescriptor, Value,
};
pub use validation::{ValidationError, ValidationResult};
