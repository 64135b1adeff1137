//! Column model for target schemas

use super::enums::ColumnType;
use serde::{Deserialize, Serialize};

/// Name of the auto-generated primary key column on every target table
pub const ROW_ID_COLUMN: &str = "_row_id";

/// A declared column of a target table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    /// Column as the store will see it, with its SQL type name
    pub fn sql_definition(&self) -> (&str, &'static str) {
        (&self.name, self.column_type.sql_type())
    }
}

/// A column as reported by the store's catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredColumn {
    pub name: String,
    /// Type name exactly as the store reports it (e.g. `character varying`)
    pub data_type: String,
}

impl StoredColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }

    pub fn is_row_id(&self) -> bool {
        self.name == ROW_ID_COLUMN
    }

    /// Column type for loading into this column; unknown store types load as TEXT
    pub fn column_type(&self) -> ColumnType {
        ColumnType::from_sql_type(&self.data_type).unwrap_or(ColumnType::Text)
    }
}
