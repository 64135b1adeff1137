//! Consolidation error taxonomy
//!
//! Expected rejections (duplicate files, duplicate data, deadlines) are
//! variants of [`ConsolidationError`] so callers can decide whether to retry
//! with a different policy.

use serde::{Deserialize, Serialize};

use crate::database::DatabaseError;
use crate::validation::ValidationError;

/// Stage an import was in when its deadline passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    /// Before the single direct-path insert
    DirectInsert,
    /// Concurrent duplicate scan of the chunked path
    DuplicateScan,
    /// Sequential commits, before the first chunk was written
    ChunkCommit,
}

impl std::fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportPhase::DirectInsert => write!(f, "direct insert"),
            ImportPhase::DuplicateScan => write!(f, "duplicate scan"),
            ImportPhase::ChunkCommit => write!(f, "chunk commit"),
        }
    }
}

/// Error type for consolidation operations
#[derive(Debug, thiserror::Error)]
pub enum ConsolidationError {
    /// The same bytes were already imported into this table
    #[error("File {file_hash} was already imported into table '{table}'")]
    FileAlreadyImported { table: String, file_hash: String },

    /// Incoming rows repeat rows already stored under the uniqueness key
    #[error("Duplicate data: {message}")]
    DuplicateData { count: u64, message: String },

    /// Incompatible schemas; raised only by caller-level flows
    #[error("Schema conflict on table '{table}': {reason}")]
    SchemaConflict { table: String, reason: String },

    /// The deadline passed before anything was written
    #[error("Deadline exceeded during {phase}; nothing was written")]
    DeadlineExceeded { phase: ImportPhase },

    /// A chunk failed to commit; earlier chunks remain committed
    ///
    /// `chunk` is the 1-based number of the failing chunk.
    #[error(
        "Chunk {chunk} failed to commit after {chunks_committed} chunks ({rows_committed} rows): {source}"
    )]
    ChunkCommitFailed {
        chunk: usize,
        chunks_committed: usize,
        rows_committed: u64,
        #[source]
        source: DatabaseError,
    },

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No cached records for the hash
    #[error("No cached records for file {0}")]
    NotCached(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl ConsolidationError {
    /// Whether retrying with another policy or table can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConsolidationError::FileAlreadyImported { .. }
                | ConsolidationError::DuplicateData { .. }
                | ConsolidationError::DeadlineExceeded { .. }
        )
    }
}

/// Result type for consolidation operations
pub type ConsolidationResult<T> = Result<T, ConsolidationError>;
