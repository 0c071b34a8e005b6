use serde::{Deserialize, Serialize};
use serde_json::Map;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SimilarRecord {
    pub id: String,
    pub record: Map<String, serde_json::Value>,
    pub distance: f64,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum FieldSummary {
    NumericRange { min: f64, max: f64, avg: f64 },
    ValueFrequency(std::collections::HashMap<String, usize>),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PatternResult {
    pub sample_count: usize,
    pub numeric_ranges: std::collections::HashMap<String, FieldSummary>,
    pub frequent_values: std::collections::HashMap<String, FieldSummary>,
}

/// Collection lifecycle "info" (spec.md §4.6), mirroring
/// `VectorEngine.get_collection_info`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CollectionInfo {
    pub name: String,
    pub count: usize,
    pub metadata: Map<String, serde_json::Value>,
}
