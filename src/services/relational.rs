//! Relational store (C5): table lifecycle, schema introspection, and safe
//! query execution over an embedded SQLite engine, grounded in
//! `intelligence/core/sql_engine.py::SQLEngine` and
//! `intelligence/core/ingest.py::DataIngestor`'s table-replace step. All
//! identifier interpolation goes through [`crate::services::security`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{Column, Row, SqlitePool, TypeInfo};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::models::table::{ColumnInfo, ColumnType, TableInfo};
use crate::services::security;
use crate::utils::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub sql: String,
}

pub struct RelationalStore {
    pool: SqlitePool,
}

impl RelationalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, ApiError> {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::from)?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    /// Schema + 3-row samples per table (spec.md §4.5).
    pub async fn table_info(&self, name: &str) -> Result<TableInfo, ApiError> {
        security::validate_table_name(name)?;
        let quoted = security::quote_identifier(name);

        let pragma_rows = sqlx::query(&format!("PRAGMA table_info({quoted})"))
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::from)?;

        if pragma_rows.is_empty() {
            return Err(ApiError::not_found(format!("table '{name}' not found")));
        }

        let columns: Vec<ColumnInfo> = pragma_rows
            .iter()
            .map(|row| {
                let col_name: String = row.get("name");
                let declared: String = row.get("type");
                let notnull: i64 = row.get("notnull");
                let pk: i64 = row.get("pk");
                ColumnInfo {
                    name: col_name,
                    column_type: parse_declared_type(&declared),
                    nullable: notnull == 0,
                    primary_key: pk != 0,
                }
            })
            .collect();

        let row_count: i64 = sqlx::query(&format!("SELECT COUNT(*) FROM {quoted}"))
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::from)?
            .get(0);

        let sample_rows_raw = sqlx::query(&format!("SELECT * FROM {quoted} LIMIT 3"))
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::from)?;
        let sample_rows = sample_rows_raw.iter().map(|row| row_to_map(row)).collect();

        Ok(TableInfo { name: name.to_string(), row_count, columns, sample_rows: Some(sample_rows) })
    }

    pub async fn schema(&self) -> Result<HashMap<String, TableInfo>, ApiError> {
        let mut schema = HashMap::new();
        for table in self.list_tables().await? {
            schema.insert(table.clone(), self.table_info(&table).await?);
        }
        Ok(schema)
    }

    /// Human-readable schema summary for LLM grounding (GLOSSARY "Schema card").
    pub fn schema_card(&self, schema: &HashMap<String, TableInfo>) -> String {
        if schema.is_empty() {
            return "No tables available".to_string();
        }
        let mut lines = vec!["Database Schema:".to_string(), String::new()];
        for (name, info) in schema {
            lines.push(format!("Table: {} ({} rows)", name, info.row_count));
            for col in &info.columns {
                let pk = if col.primary_key { " (PRIMARY KEY)" } else { "" };
                lines.push(format!("  - {}: {}{}", col.name, col.column_type, pk));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    /// (I6) only single-statement, comment-free `SELECT` reaches storage.
    pub async fn execute_select(&self, sql: &str) -> Result<QueryResult, ApiError> {
        security::validate_sql_query(sql, false)?;

        let rows = sqlx::query(sql).fetch_all(&self.pool).await.map_err(ApiError::from)?;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let data_rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| (0..row.len()).map(|i| decode_cell(row, i)).collect())
            .collect();

        Ok(QueryResult {
            row_count: data_rows.len(),
            columns,
            rows: data_rows,
            sql: sql.to_string(),
        })
    }

    pub async fn preview_table(&self, name: &str, limit: i64) -> Result<Vec<Map<String, Value>>, ApiError> {
        security::validate_table_name(name)?;
        let quoted = security::quote_identifier(name);
        let limit = security::validate_limit(limit, security::DEFAULT_MAX_LIMIT);
        let rows = sqlx::query(&format!("SELECT * FROM {quoted} LIMIT ?"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::from)?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    /// Every row of `name`, unordered and unlimited — used by callers (e.g.
    /// the scoring engine) that must rank the complete table before
    /// truncating, rather than truncating before ranking.
    pub async fn all_rows(&self, name: &str) -> Result<Vec<Map<String, Value>>, ApiError> {
        security::validate_table_name(name)?;
        let quoted = security::quote_identifier(name);
        let rows = sqlx::query(&format!("SELECT * FROM {quoted}")).fetch_all(&self.pool).await.map_err(ApiError::from)?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    pub async fn delete_table(&self, name: &str) -> Result<bool, ApiError> {
        security::validate_table_name(name)?;
        if !self.list_tables().await?.iter().any(|t| t == name) {
            return Ok(false);
        }
        let quoted = security::quote_identifier(name);
        sqlx::query(&format!("DROP TABLE {quoted}")).execute(&self.pool).await.map_err(ApiError::from)?;
        Ok(true)
    }

    /// Write-mode table replace, only reachable through the ingestion
    /// pipeline (C7): drop-if-exists + create + bulk load in one
    /// transaction (spec.md §4.5, §5 "critical section").
    pub async fn replace_table(
        &self,
        name: &str,
        columns: &[(String, ColumnType)],
        rows: &[Map<String, Value>],
    ) -> Result<usize, ApiError> {
        security::validate_table_name(name)?;
        let quoted_table = security::quote_identifier(name);

        let column_defs: Vec<String> = columns
            .iter()
            .map(|(col, ty)| format!("{} {}", security::quote_identifier(col), ty.as_sql()))
            .collect();

        let mut tx = self.pool.begin().await.map_err(ApiError::from)?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {quoted_table}")).execute(&mut *tx).await.map_err(ApiError::from)?;
        sqlx::query(&format!("CREATE TABLE {quoted_table} ({})", column_defs.join(", ")))
            .execute(&mut *tx)
            .await
            .map_err(ApiError::from)?;

        let placeholders = vec!["?"; columns.len()].join(", ");
        let quoted_cols: Vec<String> = columns.iter().map(|(c, _)| security::quote_identifier(c)).collect();
        let insert_sql =
            format!("INSERT INTO {quoted_table} ({}) VALUES ({placeholders})", quoted_cols.join(", "));

        let mut imported = 0usize;
        for row in rows {
            let mut query = sqlx::query(&insert_sql);
            for (col, _) in columns {
                let value = row.get(col).cloned().unwrap_or(Value::Null);
                query = bind_value(query, value);
            }
            query.execute(&mut *tx).await.map_err(ApiError::from)?;
            imported += 1;
        }

        tx.commit().await.map_err(ApiError::from)?;
        Ok(imported)
    }
}

fn parse_declared_type(declared: &str) -> ColumnType {
    match declared.to_uppercase().as_str() {
        "INTEGER" => ColumnType::Integer,
        "REAL" => ColumnType::Real,
        "BOOLEAN" => ColumnType::Boolean,
        "DATETIME" => ColumnType::Datetime,
        _ => ColumnType::Text,
    }
}

fn row_to_map(row: &sqlx::sqlite::SqliteRow) -> Map<String, Value> {
    let mut map = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_cell(row, i));
    }
    map
}

/// Decodes one cell as JSON, consulting the result column's declared type
/// (where sqlite reports one) so a `BOOLEAN`-affinity column round-trips as
/// `true`/`false` rather than `0`/`1` — sqlx's `bool` decode accepts any
/// integer storage class, so trying it unconditionally before `i64` would
/// turn every small integer column into a boolean.
fn decode_cell(row: &sqlx::sqlite::SqliteRow, idx: usize) -> Value {
    let is_boolean = row.column(idx).type_info().name().eq_ignore_ascii_case("BOOLEAN");
    if is_boolean {
        if let Ok(v) = row.try_get::<bool, usize>(idx) {
            return Value::from(v);
        }
    }
    if let Ok(v) = row.try_get::<i64, usize>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, usize>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<bool, usize>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<String, usize>(idx) {
        return Value::from(v);
    }
    Value::Null
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        },
        Value::String(s) => query.bind(s),
        other => query.bind(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> RelationalStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        RelationalStore::new(pool)
    }

    #[tokio::test]
    async fn replace_and_query_round_trips() {
        let store = store().await;
        let columns = vec![("vin".to_string(), ColumnType::Text), ("year".to_string(), ColumnType::Integer)];
        let mut row = Map::new();
        row.insert("vin".to_string(), Value::String("ABC".to_string()));
        row.insert("year".to_string(), Value::Number(2020.into()));

        let imported = store.replace_table("cars", &columns, &[row]).await.unwrap();
        assert_eq!(imported, 1);

        let result = store.execute_select("SELECT * FROM cars").await.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns, vec!["vin".to_string(), "year".to_string()]);
    }

    #[tokio::test]
    async fn rejects_non_select() {
        let store = store().await;
        let err = store.execute_select("DROP TABLE cars").await.unwrap_err();
        assert!(matches!(err, ApiError::Unsafe(_)));
    }

    #[tokio::test]
    async fn boolean_column_round_trips_as_json_bool() {
        let store = store().await;
        let columns = vec![("vin".to_string(), ColumnType::Text), ("closed".to_string(), ColumnType::Boolean)];
        let mut row = Map::new();
        row.insert("vin".to_string(), Value::String("ABC".to_string()));
        row.insert("closed".to_string(), Value::Bool(true));

        store.replace_table("deals", &columns, &[row]).await.unwrap();

        let result = store.execute_select("SELECT * FROM deals").await.unwrap();
        let closed_idx = result.columns.iter().position(|c| c == "closed").unwrap();
        assert_eq!(result.rows[0][closed_idx], Value::Bool(true));

        let preview = store.preview_table("deals", 10).await.unwrap();
        assert_eq!(preview[0].get("closed"), Some(&Value::Bool(true)));
    }
}
