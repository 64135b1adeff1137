//! Table schema and target descriptor models

use super::column::{Column, ROW_ID_COLUMN, StoredColumn};
use super::enums::{ColumnType, TableStrategy};
use super::policy::DuplicateCheckPolicy;
use crate::validation::{ValidationError, ValidationResult, validate_column_name, validate_table_name};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Ordered, non-empty list of uniquely named columns
///
/// The auto-generated primary key (`_row_id`) is implicit and never part of
/// the column list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Column>", into = "Vec<Column>")]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    /// Create a schema, validating column names and uniqueness
    pub fn new(columns: Vec<Column>) -> ValidationResult<Self> {
        if columns.is_empty() {
            return Err(ValidationError::Empty("table schema"));
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            validate_column_name(&column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(ValidationError::InvalidFormat(
                    "table schema",
                    format!("duplicate column name '{}'", column.name),
                ));
            }
        }

        Ok(Self { columns })
    }

    /// Convenience constructor from `(name, type)` pairs
    pub fn from_pairs<S: Into<String>>(
        pairs: impl IntoIterator<Item = (S, ColumnType)>,
    ) -> ValidationResult<Self> {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, ty)| Column::new(name, ty))
                .collect(),
        )
    }

    /// Effective schema of an existing table, excluding the primary key
    ///
    /// Store types outside the canonical vocabulary are treated as TEXT.
    pub fn from_stored(columns: &[StoredColumn]) -> ValidationResult<Self> {
        Self::new(
            columns
                .iter()
                .filter(|c| !c.is_row_id())
                .map(|c| Column::new(c.name.clone(), c.column_type()))
                .collect(),
        )
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl TryFrom<Vec<Column>> for TableSchema {
    type Error = ValidationError;

    fn try_from(columns: Vec<Column>) -> Result<Self, Self::Error> {
        TableSchema::new(columns)
    }
}

impl From<TableSchema> for Vec<Column> {
    fn from(schema: TableSchema) -> Self {
        schema.columns
    }
}

/// Where and how a batch of records is consolidated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub table_name: String,
    pub schema: TableSchema,
    /// Incoming field name → target column name. When absent the
    /// orchestrator reconciles names against the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_mapping: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub policy: DuplicateCheckPolicy,
    #[serde(default)]
    pub strategy: TableStrategy,
}

impl TargetDescriptor {
    pub fn new(table_name: impl Into<String>, schema: TableSchema) -> Self {
        Self {
            table_name: table_name.into(),
            schema,
            column_mapping: None,
            policy: DuplicateCheckPolicy::default(),
            strategy: TableStrategy::default(),
        }
    }

    pub fn with_mapping<K: Into<String>, V: Into<String>>(
        mut self,
        mapping: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.column_mapping = Some(
            mapping
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn with_policy(mut self, policy: DuplicateCheckPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_strategy(mut self, strategy: TableStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Check the table name and that the mapping only targets declared columns
    pub fn validate(&self) -> ValidationResult<()> {
        validate_table_name(&self.table_name)?;
        if let Some(mapping) = &self.column_mapping {
            for (source, target) in mapping {
                // merge targets may name columns that only exist in the table
                let undeclared = !self.schema.contains(target) && self.strategy.allows_drop();
                if target == ROW_ID_COLUMN || undeclared {
                    return Err(ValidationError::InvalidFormat(
                        "column mapping",
                        format!("'{}' maps to undeclared column '{}'", source, target),
                    ));
                }
            }
        }
        Ok(())
    }
}
