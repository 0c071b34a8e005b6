use serde::{Deserialize, Serialize};
use serde_json::Map;
use utoipa::ToSchema;

/// `{answer, supporting_data, reasoning, sql_used, similar_records,
/// classification, confidence}` from spec.md §4.12 — the "provenance" bundle
/// (see GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntelligenceResponse {
    pub answer: String,
    pub supporting_data: Option<Vec<Map<String, serde_json::Value>>>,
    pub reasoning: String,
    pub sql_used: Option<String>,
    pub similar_records: Option<Vec<serde_json::Value>>,
    pub classification: Option<String>,
    pub confidence: f64,
}
