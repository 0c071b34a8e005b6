use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use utoipa::ToSchema;

/// Suggested weight change for a single scoring factor, from
/// `intelligence/core/refinement.py::WeightAdjustment`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WeightAdjustment {
    pub category: String,
    pub factor_name: String,
    pub current_weight: i64,
    pub suggested_weight: i64,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleModificationType {
    Add,
    Adjust,
    Remove,
}

/// Reserved for future rule-modification analysis (spec.md §4.9 names it
/// alongside weight adjustments); the source never populates it today, and
/// neither does this port.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RuleModification {
    pub rule_name: String,
    pub modification_type: RuleModificationType,
    pub current_value: Option<String>,
    pub suggested_value: Option<String>,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefinementReport {
    pub generated_at: DateTime<Utc>,
    pub feedback_analyzed: i64,
    pub satisfaction_rate: f64,
    #[serde(default)]
    pub weight_adjustments: Vec<WeightAdjustment>,
    #[serde(default)]
    pub rule_modifications: Vec<RuleModification>,
    #[serde(default)]
    pub general_suggestions: Vec<String>,
    #[serde(default)]
    pub metrics_review: HashMap<String, Value>,
}

impl RefinementReport {
    pub fn new(generated_at: DateTime<Utc>, feedback_analyzed: i64, satisfaction_rate: f64) -> Self {
        Self {
            generated_at,
            feedback_analyzed,
            satisfaction_rate,
            weight_adjustments: Vec::new(),
            rule_modifications: Vec::new(),
            general_suggestions: Vec::new(),
            metrics_review: HashMap::new(),
        }
    }
}

/// One entry of `KnowledgeRefiner.get_improvement_priorities`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImprovementPriority {
    pub area: String,
    pub issue: String,
    pub frequency: i64,
    pub priority: f64,
    pub suggestion: String,
}
