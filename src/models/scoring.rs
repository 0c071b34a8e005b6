use serde::{Deserialize, Serialize};
use serde_json::Map;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScoredRecord {
    pub record: Map<String, serde_json::Value>,
    pub total_score: i64,
    pub max_possible: i64,
    pub percentage: f64,
    pub factor_scores: std::collections::HashMap<String, i64>,
    pub factor_details: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ScoreDistribution {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub buckets: std::collections::HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FactorPerformance {
    pub weight: i64,
    pub achieved: usize,
    pub total: usize,
    pub rate: f64,
    pub description: String,
}
