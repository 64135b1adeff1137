//! Enums for consolidation targets
//!
//! `ColumnType` uses `SCREAMING_SNAKE_CASE` since it mirrors SQL type
//! keywords; the remaining enums use `snake_case`.

use serde::{Deserialize, Serialize};

/// Declared type of a target column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    Integer,
    Decimal,
    Text,
    Timestamp,
    Boolean,
}

impl ColumnType {
    /// SQL type used when creating columns of this type
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Decimal => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Boolean => "BOOLEAN",
        }
    }

    /// Token of the canonical type vocabulary used for schema comparison
    pub fn canonical_token(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Boolean => "boolean",
        }
    }

    /// Map a store-reported type name back to a column type
    ///
    /// Returns `None` for types outside the canonical vocabulary
    /// (e.g. `uuid`, `jsonb`).
    pub fn from_sql_type(raw: &str) -> Option<ColumnType> {
        match normalize_type_name(raw).as_str() {
            "integer" => Some(ColumnType::Integer),
            "decimal" => Some(ColumnType::Decimal),
            "text" => Some(ColumnType::Text),
            "timestamp" => Some(ColumnType::Timestamp),
            "boolean" => Some(ColumnType::Boolean),
            _ => None,
        }
    }
}

impl std::str::FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColumnType::from_sql_type(s).ok_or_else(|| format!("Unknown column type: {}", s))
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "INTEGER"),
            ColumnType::Decimal => write!(f, "DECIMAL"),
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
            ColumnType::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

/// Normalize a SQL type name into the canonical comparison vocabulary
///
/// Lower-cases, strips type parameters (`varchar(255)` → `varchar`) and
/// array suffixes, then folds synonyms: character types to `text`, integer
/// types to `integer`, exact and floating numerics to `decimal`, date/time
/// types to `timestamp`, and `bool` to `boolean`. Unknown names are returned
/// lower-cased and stripped.
pub fn normalize_type_name(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let base = match lower.find('(') {
        Some(idx) => {
            // keep trailing words, e.g. "timestamp(6) with time zone"
            let tail = lower[idx..]
                .find(')')
                .map(|end| &lower[idx + end + 1..])
                .unwrap_or("");
            format!("{}{}", &lower[..idx], tail)
        }
        None => lower,
    };
    let base = base.trim_end_matches("[]");
    let base = base.split_whitespace().collect::<Vec<_>>().join(" ");

    let canonical = match base.as_str() {
        "text" | "varchar" | "character varying" | "char" | "character" | "bpchar"
        | "string" | "nvarchar" | "nchar" | "clob" => "text",
        "integer" | "int" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "tinyint"
        | "hugeint" | "serial" | "bigserial" | "smallserial" | "long" => "integer",
        "decimal" | "numeric" | "real" | "float" | "float4" | "float8" | "double"
        | "double precision" => "decimal",
        "timestamp"
        | "timestamptz"
        | "timestamp without time zone"
        | "timestamp with time zone"
        | "datetime"
        | "date" => "timestamp",
        "boolean" | "bool" | "logical" => "boolean",
        other => return other.to_string(),
    };
    canonical.to_string()
}

/// How an existing table with a different shape is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStrategy {
    /// Drop and recreate the table when the declared schema differs
    #[default]
    Replace,
    /// Keep the existing table and load into its current shape
    Merge,
    /// Like `Merge`, adding declared columns the table lacks as TEXT first
    Extend,
}

impl TableStrategy {
    /// Whether this strategy may drop an existing table
    pub fn allows_drop(&self) -> bool {
        matches!(self, TableStrategy::Replace)
    }
}

impl std::str::FromStr for TableStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "replace" | "new" | "new_table" => Ok(TableStrategy::Replace),
            "merge" => Ok(TableStrategy::Merge),
            "extend" => Ok(TableStrategy::Extend),
            _ => Err(format!("Unknown table strategy: {}", s)),
        }
    }
}

/// What `ensure_table` did to the target table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableAction {
    Created,
    Recreated,
    Unchanged,
    /// Table exists with a different shape and was kept (merge/extend)
    Diverged,
}

impl TableAction {
    /// True when the table is known to be empty after the action
    pub fn is_fresh(&self) -> bool {
        matches!(self, TableAction::Created | TableAction::Recreated)
    }
}

impl std::fmt::Display for TableAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableAction::Created => write!(f, "created"),
            TableAction::Recreated => write!(f, "recreated"),
            TableAction::Unchanged => write!(f, "unchanged"),
            TableAction::Diverged => write!(f, "diverged"),
        }
    }
}
