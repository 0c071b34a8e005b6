use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Trend,
    Anomaly,
    Opportunity,
    Risk,
    Milestone,
    Comparison,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InsightPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// From spec.md §3. `data_points` carries first-class numeric evidence
/// rather than a free-form string, per spec.md §9's "structured `details`"
/// re-architecture note.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Insight {
    pub insight_type: InsightType,
    pub priority: InsightPriority,
    pub title: String,
    pub description: String,
    pub data_points: Value,
    pub recommendations: Vec<String>,
    pub table_name: Option<String>,
    pub category: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InsightReport {
    pub generated_at: DateTime<Utc>,
    pub tables_analyzed: Vec<String>,
    pub insights: Vec<Insight>,
    pub summary: String,
}

impl InsightReport {
    pub fn count_by_priority(&self) -> std::collections::HashMap<&'static str, usize> {
        let mut counts = std::collections::HashMap::new();
        for insight in &self.insights {
            let key = match insight.priority {
                InsightPriority::Low => "low",
                InsightPriority::Medium => "medium",
                InsightPriority::High => "high",
                InsightPriority::Critical => "critical",
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }
}
