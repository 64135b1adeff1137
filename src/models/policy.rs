//! Duplicate-check policy

use serde::{Deserialize, Serialize};

/// Controls file-level and row-level duplicate detection for one import
///
/// `allow_duplicates` keeps both checks running but makes detected row
/// duplicates non-fatal. `force_import` skips both checks entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCheckPolicy {
    /// Run the row-level check
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reject files whose content hash was already imported into the table
    #[serde(default = "default_true")]
    pub check_file_level: bool,

    /// Columns forming the uniqueness key; `None` means all columns
    #[serde(default)]
    pub uniqueness_columns: Option<Vec<String>>,

    /// Report duplicates but insert every row anyway
    #[serde(default)]
    pub allow_duplicates: bool,

    /// Skip both checks
    #[serde(default)]
    pub force_import: bool,

    /// Also count rows repeating an earlier row of the same batch
    #[serde(default)]
    pub include_intra_batch: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DuplicateCheckPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            check_file_level: true,
            uniqueness_columns: None,
            allow_duplicates: false,
            force_import: false,
            include_intra_batch: false,
        }
    }
}

impl DuplicateCheckPolicy {
    /// Policy with every check switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            check_file_level: false,
            ..Self::default()
        }
    }

    pub fn with_uniqueness_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.uniqueness_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn allowing_duplicates(mut self) -> Self {
        self.allow_duplicates = true;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force_import = true;
        self
    }

    pub fn counting_intra_batch(mut self) -> Self {
        self.include_intra_batch = true;
        self
    }

    pub fn file_check_active(&self) -> bool {
        self.check_file_level && !self.force_import
    }

    pub fn row_check_active(&self) -> bool {
        self.enabled && !self.force_import
    }

    /// Whether detected row duplicates abort the import
    pub fn duplicates_are_fatal(&self) -> bool {
        self.row_check_active() && !self.allow_duplicates
    }
}
