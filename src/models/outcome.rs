//! Import outcome reported by the consolidation orchestrator

use super::enums::TableAction;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final status of an import that was not rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImportStatus {
    Completed,
    /// The deadline passed during sequential commits; the first
    /// `chunks_committed` chunks are durable and the rest were never written
    PartiallyCommitted {
        chunks_committed: usize,
        chunks_total: usize,
    },
}

/// Which write path the orchestrator took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum ConsolidationPath {
    /// One comparison and one transactional insert
    Direct,
    /// Concurrent pushdown checks, then sequential per-chunk commits
    Chunked { chunks: usize, chunk_size: usize },
}

/// Result of one consolidation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub import_id: Uuid,
    pub table_name: String,
    /// Records handed to the orchestrator
    pub records_received: usize,
    /// Rows committed to the table
    pub records_processed: usize,
    /// Incoming rows whose key already exists in the table (plus repeats
    /// within the batch when the policy counts them)
    pub duplicates_found: u64,
    pub intra_batch_duplicates: u64,
    pub status: ImportStatus,
    pub path: ConsolidationPath,
    pub table_action: TableAction,
    /// Coercion and reconciliation warnings, capped
    pub warnings: Vec<String>,
    /// Warnings dropped after the cap was reached
    pub warnings_truncated: usize,
    pub file_hash: Option<String>,
    pub duration_ms: u64,
}

impl ImportOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == ImportStatus::Completed
    }

    pub fn total_warnings(&self) -> usize {
        self.warnings.len() + self.warnings_truncated
    }
}

/// Bounded collector for caller-visible warnings
#[derive(Debug, Clone, Default)]
pub struct WarningLog {
    limit: usize,
    warnings: Vec<String>,
    truncated: usize,
}

impl WarningLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            warnings: Vec::new(),
            truncated: 0,
        }
    }

    pub fn push(&mut self, warning: impl Into<String>) {
        if self.warnings.len() < self.limit {
            self.warnings.push(warning.into());
        } else {
            self.truncated += 1;
        }
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = String>) {
        for warning in warnings {
            self.push(warning);
        }
    }

    pub fn len(&self) -> usize {
        self.warnings.len() + self.truncated
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_parts(self) -> (Vec<String>, usize) {
        (self.warnings, self.truncated)
    }
}
