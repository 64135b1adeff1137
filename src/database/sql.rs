//! SQL rendering shared by DuckDB and PostgreSQL
//!
//! All values are bound as text and cast to the column type inside the
//! statement (`CAST(CAST($1 AS TEXT) AS BIGINT)`), so a single parameter
//! type works for every column on both stores. Identifiers are always quoted.

use crate::models::{Column, ColumnType, KeyColumn, KeyKind, ROW_ID_COLUMN, TableSchema, Value};
use crate::validation::{quote_identifier, quote_literal};

/// Statement-level differences between the supported stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    DuckDb,
}

impl SqlDialect {
    /// Positional placeholder, 1-based
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", index),
            SqlDialect::DuckDb => "?".to_string(),
        }
    }

    /// SQL type for a declared column type
    pub fn column_sql_type(&self, column_type: ColumnType) -> &'static str {
        match (self, column_type) {
            (SqlDialect::DuckDb, ColumnType::Decimal) => "DOUBLE",
            (_, other) => other.sql_type(),
        }
    }

    /// SQL type both sides of a key comparison are cast to
    pub fn key_sql_type(&self, kind: KeyKind) -> &'static str {
        match (self, kind) {
            (SqlDialect::DuckDb, KeyKind::Numeric) => "DOUBLE",
            (SqlDialect::DuckDb, KeyKind::Integer) => "HUGEINT",
            (_, other) => other.comparison_sql_type(),
        }
    }

    fn text_param(&self, index: usize) -> String {
        format!("CAST({} AS TEXT)", self.placeholder(index))
    }

    fn typed_param(&self, index: usize, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Text => self.text_param(index),
            other => format!(
                "CAST({} AS {})",
                self.text_param(index),
                self.column_sql_type(other)
            ),
        }
    }
}

/// Name of the DuckDB sequence backing a table's primary key
pub fn row_id_sequence(table: &str) -> String {
    format!("{}_row_id_seq", table)
}

fn column_definitions(dialect: SqlDialect, schema: &TableSchema) -> String {
    schema
        .columns()
        .iter()
        .map(|c| {
            format!(
                "{} {}",
                quote_identifier(&c.name),
                dialect.column_sql_type(c.column_type)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE IF NOT EXISTS` with the auto-generated primary key
///
/// DuckDB has no serial type, so its rendering creates a sequence first and
/// returns two statements.
pub fn create_table_sql(dialect: SqlDialect, table: &str, schema: &TableSchema) -> String {
    let columns = column_definitions(dialect, schema);
    let row_id = quote_identifier(ROW_ID_COLUMN);
    match dialect {
        SqlDialect::Postgres => format!(
            "CREATE TABLE IF NOT EXISTS {} ({} BIGSERIAL PRIMARY KEY, {})",
            quote_identifier(table),
            row_id,
            columns
        ),
        SqlDialect::DuckDb => {
            let sequence = row_id_sequence(table);
            format!(
                "CREATE SEQUENCE IF NOT EXISTS {};\nCREATE TABLE IF NOT EXISTS {} ({} BIGINT PRIMARY KEY DEFAULT nextval({}), {})",
                quote_identifier(&sequence),
                quote_identifier(table),
                row_id,
                quote_literal(&sequence),
                columns
            )
        }
    }
}

pub fn drop_table_sql(dialect: SqlDialect, table: &str) -> String {
    match dialect {
        SqlDialect::Postgres => format!("DROP TABLE IF EXISTS {}", quote_identifier(table)),
        SqlDialect::DuckDb => format!(
            "DROP TABLE IF EXISTS {};\nDROP SEQUENCE IF EXISTS {}",
            quote_identifier(table),
            quote_identifier(&row_id_sequence(table))
        ),
    }
}

pub fn add_column_sql(
    dialect: SqlDialect,
    table: &str,
    column: &str,
    column_type: ColumnType,
) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
        quote_identifier(table),
        quote_identifier(column),
        dialect.column_sql_type(column_type)
    )
}

pub fn row_count_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_identifier(table))
}

/// Rows per multi-row statement that stay within the parameter limit
pub fn rows_per_statement(max_parameters: usize, column_count: usize) -> usize {
    (max_parameters / column_count.max(1)).max(1)
}

/// Multi-row `INSERT ... VALUES` for `row_count` rows
pub fn insert_sql(dialect: SqlDialect, table: &str, columns: &[Column], row_count: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut index = 0;
    let rows = (0..row_count)
        .map(|_| {
            let values = columns
                .iter()
                .map(|c| {
                    index += 1;
                    dialect.typed_param(index, c.column_type)
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", values)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_identifier(table),
        column_list,
        rows
    )
}

/// `SELECT` of the key columns as text, one row per stored row
pub fn key_select_sql(table: &str, key: &[KeyColumn]) -> String {
    let columns = key
        .iter()
        .map(|k| format!("CAST({} AS TEXT)", quote_identifier(&k.name)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {} FROM {}", columns, quote_identifier(table))
}

/// Pushdown duplicate count over `tuple_count` incoming tuples
///
/// ```sql
/// SELECT COUNT(*) FROM (VALUES (CAST($1 AS TEXT)), ...) AS incoming(k0)
/// WHERE EXISTS (SELECT 1 FROM "t" AS existing
///               WHERE CAST(existing."email" AS TEXT) = CAST(incoming.k0 AS TEXT))
/// ```
pub fn key_match_sql(
    dialect: SqlDialect,
    table: &str,
    key: &[KeyColumn],
    tuple_count: usize,
) -> String {
    let mut index = 0;
    let values = (0..tuple_count)
        .map(|_| {
            let params = key
                .iter()
                .map(|_| {
                    index += 1;
                    dialect.text_param(index)
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", params)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let aliases = (0..key.len())
        .map(|i| format!("k{}", i))
        .collect::<Vec<_>>()
        .join(", ");

    let conditions = key
        .iter()
        .enumerate()
        .map(|(i, k)| {
            let cast = dialect.key_sql_type(k.kind);
            format!(
                "CAST(existing.{} AS {}) = CAST(incoming.k{} AS {})",
                quote_identifier(&k.name),
                cast,
                i,
                cast
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "SELECT COUNT(*) FROM (VALUES {}) AS incoming({}) WHERE EXISTS (SELECT 1 FROM {} AS existing WHERE {})",
        values,
        aliases,
        quote_identifier(table),
        conditions
    )
}

/// Bind parameters for rows, flattened in row-major order
pub fn text_params<'a>(rows: impl IntoIterator<Item = &'a Vec<Value>>) -> Vec<Option<String>> {
    rows.into_iter()
        .flat_map(|row| row.iter().map(Value::to_sql_text))
        .collect()
}

/// `COPY ... FROM STDIN` in text format
pub fn copy_in_sql(table: &str, columns: &[Column]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
        quote_identifier(table),
        column_list
    )
}

/// Append one row in COPY text format: tab-separated, `\N` for NULL,
/// backslash escapes for control characters
pub fn encode_copy_row(buf: &mut Vec<u8>, row: &[Value]) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            buf.push(b'\t');
        }
        match value.to_sql_text() {
            None => buf.extend_from_slice(b"\\N"),
            Some(text) => {
                for byte in text.bytes() {
                    match byte {
                        b'\\' => buf.extend_from_slice(b"\\\\"),
                        b'\t' => buf.extend_from_slice(b"\\t"),
                        b'\n' => buf.extend_from_slice(b"\\n"),
                        b'\r' => buf.extend_from_slice(b"\\r"),
                        other => buf.push(other),
                    }
                }
            }
        }
    }
    buf.push(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::from_pairs([("email", ColumnType::Text), ("age", ColumnType::Integer)])
            .unwrap()
    }

    #[test]
    fn test_create_table_postgres() {
        let sql = create_table_sql(SqlDialect::Postgres, "contacts", &schema());
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"contacts\" (\"_row_id\" BIGSERIAL PRIMARY KEY, \"email\" TEXT, \"age\" BIGINT)"
        );
    }

    #[test]
    fn test_create_table_duckdb_uses_sequence() {
        let sql = create_table_sql(SqlDialect::DuckDb, "contacts", &schema());
        assert!(sql.starts_with("CREATE SEQUENCE IF NOT EXISTS \"contacts_row_id_seq\""));
        assert!(sql.contains("DEFAULT nextval('contacts_row_id_seq')"));
    }

    #[test]
    fn test_insert_sql_numbers_placeholders_across_rows() {
        let columns = schema().columns().to_vec();
        let sql = insert_sql(SqlDialect::Postgres, "contacts", &columns, 2);
        assert_eq!(
            sql,
            "INSERT INTO \"contacts\" (\"email\", \"age\") VALUES \
             (CAST($1 AS TEXT), CAST(CAST($2 AS TEXT) AS BIGINT)), \
             (CAST($3 AS TEXT), CAST(CAST($4 AS TEXT) AS BIGINT))"
        );
        let duck = insert_sql(SqlDialect::DuckDb, "contacts", &columns, 1);
        assert!(duck.contains("CAST(CAST(? AS TEXT) AS BIGINT)"));
    }

    #[test]
    fn test_key_match_sql_casts_both_sides() {
        let key = vec![
            KeyColumn::new("email", KeyKind::Text),
            KeyColumn::new("age", KeyKind::Numeric),
        ];
        let sql = key_match_sql(SqlDialect::Postgres, "contacts", &key, 2);
        assert!(sql.contains("(VALUES (CAST($1 AS TEXT), CAST($2 AS TEXT)), (CAST($3 AS TEXT), CAST($4 AS TEXT))) AS incoming(k0, k1)"));
        assert!(sql.contains(
            "CAST(existing.\"age\" AS DOUBLE PRECISION) = CAST(incoming.k1 AS DOUBLE PRECISION)"
        ));
        let duck = key_match_sql(SqlDialect::DuckDb, "contacts", &key, 1);
        assert!(duck.contains("CAST(existing.\"age\" AS DOUBLE) = CAST(incoming.k1 AS DOUBLE)"));
    }

    #[test]
    fn test_integer_keys_compare_exactly() {
        let key = vec![KeyColumn::new("id", KeyKind::Integer)];
        let sql = key_match_sql(SqlDialect::Postgres, "ids", &key, 1);
        assert!(sql.contains("CAST(existing.\"id\" AS NUMERIC) = CAST(incoming.k0 AS NUMERIC)"));
        let duck = key_match_sql(SqlDialect::DuckDb, "ids", &key, 1);
        assert!(duck.contains("CAST(existing.\"id\" AS HUGEINT) = CAST(incoming.k0 AS HUGEINT)"));
    }

    #[test]
    fn test_identifiers_are_quoted() {
        let sql = add_column_sql(SqlDialect::Postgres, "contacts", "Phone \"Mobile\"", ColumnType::Text);
        assert_eq!(
            sql,
            "ALTER TABLE \"contacts\" ADD COLUMN IF NOT EXISTS \"Phone \"\"Mobile\"\"\" TEXT"
        );
    }

    #[test]
    fn test_rows_per_statement() {
        assert_eq!(rows_per_statement(65_535, 2), 32_767);
        assert_eq!(rows_per_statement(10, 20), 1);
        assert_eq!(rows_per_statement(10, 0), 10);
    }

    #[test]
    fn test_encode_copy_row_escapes() {
        let mut buf = Vec::new();
        encode_copy_row(
            &mut buf,
            &[Value::from("a\tb\\c"), Value::Null, Value::Int(5)],
        );
        assert_eq!(buf, b"a\\tb\\\\c\t\\N\t5\n".to_vec());
    }
}
