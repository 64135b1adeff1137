//! Schema reconciliation
//!
//! Matches incoming column names against a target column set using
//! case-insensitive exact matching, and reshapes records into the target
//! schema's column order.

use crate::models::{Record, TableSchema, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Outcome of matching source columns against target columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Source column → target column
    pub column_mapping: BTreeMap<String, String>,
    /// Source columns with no matching target column, in source order
    pub new_columns: Vec<String>,
    /// Target columns no source column maps to, in target order
    pub unmatched_targets: Vec<String>,
    /// Matched / max(source, target) × 100; diagnostic only
    pub match_percentage: f64,
}

impl ReconciliationResult {
    pub fn is_exact(&self) -> bool {
        self.new_columns.is_empty() && self.unmatched_targets.is_empty()
    }
}

/// Match `source` column names against `target` column names
///
/// A source column matches the target column with the same name, or failing
/// that, the target column equal to it ignoring case. Every source column ends
/// up in exactly one of `column_mapping` or `new_columns`.
///
/// # Examples
///
/// ```
/// use data_consolidation_sdk::reconcile::reconcile;
///
/// let source = vec!["Email".to_string(), "Phone".to_string()];
/// let target = vec!["email".to_string(), "name".to_string()];
/// let result = reconcile(&source, &target);
/// assert_eq!(result.column_mapping.get("Email").map(String::as_str), Some("email"));
/// assert_eq!(result.new_columns, vec!["Phone".to_string()]);
/// assert_eq!(result.match_percentage, 50.0);
/// ```
pub fn reconcile(source: &[String], target: &[String]) -> ReconciliationResult {
    let exact: HashSet<&str> = target.iter().map(String::as_str).collect();
    let mut by_lowercase: HashMap<String, &str> = HashMap::with_capacity(target.len());
    for name in target {
        // first target wins among names differing only by case
        by_lowercase.entry(name.to_lowercase()).or_insert(name.as_str());
    }

    let mut column_mapping = BTreeMap::new();
    let mut new_columns = Vec::new();
    let mut matched_targets: HashSet<&str> = HashSet::new();

    let mut seen: HashSet<&str> = HashSet::with_capacity(source.len());

    for name in source {
        if !seen.insert(name.as_str()) {
            continue;
        }
        let matched = if exact.contains(name.as_str()) {
            Some(name.as_str())
        } else {
            by_lowercase.get(&name.to_lowercase()).copied()
        };
        match matched {
            Some(target_name) => {
                matched_targets.insert(target_name);
                column_mapping.insert(name.clone(), target_name.to_string());
            }
            None => new_columns.push(name.clone()),
        }
    }

    let unmatched_targets = target
        .iter()
        .filter(|name| !matched_targets.contains(name.as_str()))
        .cloned()
        .collect();

    let denominator = source.len().max(target.len());
    let match_percentage = if denominator == 0 {
        100.0
    } else {
        column_mapping.len() as f64 / denominator as f64 * 100.0
    };

    tracing::debug!(
        "Reconciled {} source columns against {} target columns: {} matched, {} new",
        source.len(),
        target.len(),
        column_mapping.len(),
        new_columns.len()
    );

    ReconciliationResult {
        column_mapping,
        new_columns,
        unmatched_targets,
        match_percentage,
    }
}

/// Reshape a record into `target` column order
///
/// Keys are renamed per `mapping`; source columns absent from the mapping are
/// dropped; target columns nothing maps to are filled with `Null`. When two
/// source columns map to the same target, the first non-null value wins.
pub fn transform_record(
    record: &Record,
    mapping: &BTreeMap<String, String>,
    target: &TableSchema,
) -> Record {
    let mut values: Vec<Value> = vec![Value::Null; target.len()];
    for (source, value) in record.iter() {
        let Some(target_name) = mapping.get(source) else {
            continue;
        };
        if let Some(position) = target.position(target_name)
            && values[position].is_null()
        {
            values[position] = value.clone();
        }
    }

    target
        .columns()
        .iter()
        .map(|c| c.name.clone())
        .zip(values)
        .collect()
}

/// Source column → target position lookup, resolved once per batch
#[derive(Debug, Clone)]
pub(crate) struct ColumnProjection {
    positions: HashMap<String, usize>,
    width: usize,
}

impl ColumnProjection {
    pub(crate) fn new(mapping: &BTreeMap<String, String>, target: &TableSchema) -> Self {
        let positions = mapping
            .iter()
            .filter_map(|(source, target_name)| {
                target.position(target_name).map(|p| (source.clone(), p))
            })
            .collect();
        Self {
            positions,
            width: target.len(),
        }
    }

    /// Values aligned with the target schema, same rules as [`transform_record`]
    pub(crate) fn project(&self, record: &Record) -> Vec<Value> {
        let mut values = vec![Value::Null; self.width];
        for (source, value) in record.iter() {
            if let Some(&position) = self.positions.get(source)
                && values[position].is_null()
            {
                values[position] = value.clone();
            }
        }
        values
    }
}
