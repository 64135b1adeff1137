//! Import tracking sink
//!
//! The orchestrator reports the start and end of every import. Tracking is
//! advisory: a failing tracker is logged and never fails the import.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::DatabaseResult;

/// Import about to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStart {
    pub table_name: String,
    pub file_hash: Option<String>,
    pub records_received: usize,
    pub started_at: DateTime<Utc>,
}

/// Terminal state of an import in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Completed,
    PartiallyCommitted,
    /// Refused as a duplicate file or duplicate data
    Rejected,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Completed => "completed",
            HistoryStatus::PartiallyCommitted => "partially_committed",
            HistoryStatus::Rejected => "rejected",
            HistoryStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Import that finished, successfully or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportCompletion {
    pub status: HistoryStatus,
    pub records_processed: usize,
    pub duplicates_found: u64,
    pub message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Receives import lifecycle events
#[async_trait]
pub trait ImportTracker: Send + Sync {
    /// Record that an import started
    ///
    /// # Returns
    /// Identifier later passed to [`ImportTracker::record_import_complete`]
    async fn record_import_start(&self, start: &ImportStart) -> DatabaseResult<Uuid>;

    /// Record how an import ended
    async fn record_import_complete(
        &self,
        import_id: Uuid,
        completion: &ImportCompletion,
    ) -> DatabaseResult<()>;
}

/// Tracker that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

#[async_trait]
impl ImportTracker for NoopTracker {
    async fn record_import_start(&self, _start: &ImportStart) -> DatabaseResult<Uuid> {
        Ok(Uuid::new_v4())
    }

    async fn record_import_complete(
        &self,
        _import_id: Uuid,
        _completion: &ImportCompletion,
    ) -> DatabaseResult<()> {
        Ok(())
    }
}
