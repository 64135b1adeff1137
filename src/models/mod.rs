//! Models module for the SDK
//!
//! Defines the records, schemas, descriptors and outcomes the consolidation
//! engine works with.

pub mod column;
pub mod enums;
pub mod key;
pub mod outcome;
pub mod policy;
pub mod table;
pub mod value;

pub use column::{Column, ROW_ID_COLUMN, StoredColumn};
pub use enums::*;
pub use key::{KeyColumn, KeyKind, comparable_tuple, comparable_value};
pub use outcome::{ConsolidationPath, ImportOutcome, ImportStatus, WarningLog};
pub use policy::DuplicateCheckPolicy;
pub use table::{TableSchema, TargetDescriptor};
pub use value::{Record, Value};
