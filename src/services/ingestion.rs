//! Ingestion pipeline (C7): CSV → schema → relational → PII → vector,
//! grounded in `intelligence/core/ingest.py::DataIngestor`.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::ingestion::IngestResult;
use crate::models::table::ColumnType;
use crate::services::pii;
use crate::services::relational::RelationalStore;
use crate::services::security;
use crate::services::vector::VectorStore;
use crate::utils::ApiError;

pub struct IngestionPipeline {
    relational: Arc<RelationalStore>,
    vector: Arc<VectorStore>,
    primary_key_hints: Vec<String>,
}

impl IngestionPipeline {
    pub fn new(relational: Arc<RelationalStore>, vector: Arc<VectorStore>, primary_key_hints: Vec<String>) -> Self {
        Self { relational, vector, primary_key_hints }
    }

    /// Runs the full ingestion procedure (spec.md §4.7) as a single
    /// critical section against the relational store.
    pub async fn ingest_csv(
        &self,
        csv_bytes: &[u8],
        table_name_hint: Option<&str>,
        pk_hint: Option<&str>,
    ) -> Result<IngestResult, ApiError> {
        let text = String::from_utf8(csv_bytes.to_vec())
            .map_err(|_| ApiError::validation("upload is not valid UTF-8"))?;

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(text.as_bytes());
        let original_headers: Vec<String> =
            reader.headers().map_err(|e| ApiError::validation(format!("malformed CSV header: {e}")))?.iter().map(str::to_string).collect();

        if original_headers.is_empty() {
            return Err(ApiError::validation("CSV content is empty"));
        }

        let raw_rows: Vec<csv::StringRecord> =
            reader.records().collect::<Result<Vec<_>, _>>().map_err(|e| ApiError::validation(format!("malformed CSV row: {e}")))?;
        if raw_rows.is_empty() {
            return Err(ApiError::validation("CSV content has no data rows"));
        }

        let mut warnings = Vec::new();
        let columns = canonicalize_columns(&original_headers, &mut warnings);

        let mut column_values: Vec<Vec<&str>> = vec![Vec::with_capacity(raw_rows.len()); columns.len()];
        for record in &raw_rows {
            for (idx, cell) in record.iter().enumerate() {
                if let Some(bucket) = column_values.get_mut(idx) {
                    bucket.push(cell);
                }
            }
        }

        let column_types: Vec<ColumnType> = column_values.iter().map(|values| infer_column_type(values)).collect();

        let records: Vec<Map<String, Value>> = raw_rows
            .iter()
            .map(|record| {
                let mut row = Map::new();
                for (idx, column) in columns.iter().enumerate() {
                    let cell = record.get(idx).unwrap_or("");
                    row.insert(column.clone(), cell_to_value(cell, column_types[idx]));
                }
                row
            })
            .collect();

        let primary_key = self.detect_primary_key(&columns, pk_hint);
        if let Some(ref pk) = primary_key {
            if has_duplicates(&records, pk) {
                warnings.push(format!("primary key column '{pk}' contains duplicate values"));
            }
        }

        let table_name = security::sanitize_table_name(table_name_hint.unwrap_or("uploaded_data"));

        let table_columns: Vec<(String, ColumnType)> =
            columns.iter().cloned().zip(column_types.iter().copied()).collect();
        let rows_imported = self.relational.replace_table(&table_name, &table_columns, &records).await?;

        let pii_summary = pii::scan_records(&records);

        let records_embedded = self.vector.upsert_records(&table_name, &records, primary_key.as_deref()).await?;

        Ok(IngestResult {
            table_name,
            rows_imported,
            columns,
            column_types: column_types.into_iter().enumerate().map(|(i, t)| (columns_name(&table_columns, i), t)).collect(),
            primary_key,
            warnings,
            records_embedded,
            pii_summary,
        })
    }

    /// Explicit hint wins; otherwise scans the vertical's ordered hint list
    /// (spec.md §4.7 step 5).
    fn detect_primary_key(&self, columns: &[String], pk_hint: Option<&str>) -> Option<String> {
        if let Some(hint) = pk_hint {
            let cleaned = security::sanitize_identifier(hint);
            if columns.iter().any(|c| c == &cleaned) {
                return Some(cleaned);
            }
            if columns.iter().any(|c| c == hint) {
                return Some(hint.to_string());
            }
        }

        for hint in &self.primary_key_hints {
            let cleaned = security::sanitize_identifier(hint);
            if let Some(found) = columns.iter().find(|c| *c == &cleaned || *c == hint) {
                return Some(found.clone());
            }
        }

        None
    }
}

fn columns_name(table_columns: &[(String, ColumnType)], idx: usize) -> String {
    table_columns[idx].0.clone()
}

/// Canonicalizes column names via the identifier sanitizer (empty → a
/// generated placeholder, lowercased, non-alnum → `_`), de-duplicating
/// collisions with a numeric suffix and recording every rename.
fn canonicalize_columns(original: &[String], warnings: &mut Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(original.len());

    for name in original {
        let mut cleaned = security::sanitize_identifier(name);
        if cleaned != *name {
            warnings.push(format!("column '{name}' renamed to '{cleaned}'"));
        }
        if seen.contains(&cleaned) {
            let mut suffix = 2;
            let base = cleaned.clone();
            while seen.contains(&cleaned) {
                cleaned = format!("{base}_{suffix}");
                suffix += 1;
            }
            warnings.push(format!("column '{name}' renamed to '{cleaned}' to avoid a duplicate name"));
        }
        seen.insert(cleaned.clone());
        result.push(cleaned);
    }

    result
}

/// Integer → real → boolean → datetime → text priority ladder (spec.md
/// §4.7 step 4). A column falls through to the next type unless every
/// non-empty value in it parses.
fn infer_column_type(values: &[&str]) -> ColumnType {
    let non_empty: Vec<&str> = values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).collect();
    if non_empty.is_empty() {
        return ColumnType::Text;
    }
    if non_empty.iter().all(|v| v.parse::<i64>().is_ok()) {
        return ColumnType::Integer;
    }
    if non_empty.iter().all(|v| v.parse::<f64>().is_ok()) {
        return ColumnType::Real;
    }
    if non_empty.iter().all(|v| matches!(v.to_lowercase().as_str(), "true" | "false")) {
        return ColumnType::Boolean;
    }
    if non_empty.iter().all(|v| parse_datetime(v).is_some()) {
        return ColumnType::Datetime;
    }
    ColumnType::Text
}

fn parse_datetime(value: &str) -> Option<chrono::NaiveDateTime> {
    const FORMATS: &[&str] = &["%Y-%m-%d", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y"];
    for format in FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn cell_to_value(cell: &str, column_type: ColumnType) -> Value {
    if cell.trim().is_empty() {
        return Value::Null;
    }
    match column_type {
        ColumnType::Integer => cell.trim().parse::<i64>().map(Value::from).unwrap_or(Value::Null),
        ColumnType::Real => cell.trim().parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number).unwrap_or(Value::Null),
        ColumnType::Boolean => Some(cell.trim().eq_ignore_ascii_case("true")).map(Value::Bool).unwrap_or(Value::Null),
        ColumnType::Datetime | ColumnType::Text => Value::String(cell.to_string()),
    }
}

fn has_duplicates(records: &[Map<String, Value>], column: &str) -> bool {
    let mut seen: HashSet<String> = HashSet::new();
    for record in records {
        let Some(value) = record.get(column) else { continue };
        if value.is_null() {
            continue;
        }
        let key = value.to_string();
        if !seen.insert(key) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::vector::FallbackEmbedder;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pipeline() -> IngestionPipeline {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let relational = Arc::new(RelationalStore::new(pool));
        let dir = tempfile::tempdir().unwrap();
        let vector = Arc::new(VectorStore::new(dir.path().to_path_buf(), Arc::new(FallbackEmbedder)).await.unwrap());
        IngestionPipeline::new(relational, vector, vec!["id".to_string(), "ID".to_string()])
    }

    #[tokio::test]
    async fn ingests_and_detects_primary_key() {
        let pipeline = pipeline().await;
        let csv = "ID,Sale Price,Closed?\n1,20000,true\n2,21000,false\n";
        let result = pipeline.ingest_csv(csv.as_bytes(), Some("sales"), None).await.unwrap();

        assert_eq!(result.table_name, "sales");
        assert_eq!(result.rows_imported, 2);
        assert_eq!(result.primary_key, Some("id".to_string()));
        assert!(result.columns.contains(&"sale_price".to_string()));
        assert_eq!(result.column_types.get("closed").copied(), Some(ColumnType::Boolean));
    }

    #[tokio::test]
    async fn rejects_empty_csv() {
        let pipeline = pipeline().await;
        let err = pipeline.ingest_csv(b"", None, None).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn infers_types_per_ladder() {
        assert_eq!(infer_column_type(&["1", "2", "3"]), ColumnType::Integer);
        assert_eq!(infer_column_type(&["1.5", "2"]), ColumnType::Real);
        assert_eq!(infer_column_type(&["true", "false"]), ColumnType::Boolean);
        assert_eq!(infer_column_type(&["2024-01-01", "2024-02-01"]), ColumnType::Datetime);
        assert_eq!(infer_column_type(&["a", "b"]), ColumnType::Text);
    }
}
