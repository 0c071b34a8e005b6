use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::table::ColumnType;
use crate::services::pii::PiiSummary;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestResult {
    pub table_name: String,
    pub rows_imported: usize,
    pub columns: Vec<String>,
    pub column_types: std::collections::HashMap<String, ColumnType>,
    pub primary_key: Option<String>,
    pub warnings: Vec<String>,
    pub records_embedded: usize,
    pub pii_summary: PiiSummary,
}
