use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// `{name, description, weight, calculation}` from spec.md §3. `calculation`
/// is the raw predicate string; the scoring engine (C8) parses it once into
/// a `Predicate` at knowledge-load time per spec.md §9's re-architecture
/// note, rather than re-parsing per row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScoringFactor {
    pub name: String,
    pub description: String,
    pub weight: i64,
    pub calculation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BusinessRule {
    pub name: String,
    pub description: String,
    pub condition: String,
    pub severity: RuleSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Metric {
    pub name: String,
    pub description: String,
    pub target: f64,
    pub warning: f64,
    pub critical: f64,
    pub lower_is_better: bool,
}

/// `{scoring: map<category, list<factor>>, rules, metrics, custom}` from
/// spec.md §3, mirroring `intelligence/core/knowledge.py::DomainKnowledge`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeState {
    #[serde(default)]
    pub scoring_factors: HashMap<String, Vec<ScoringFactor>>,
    #[serde(default)]
    pub rules: Vec<BusinessRule>,
    #[serde(default)]
    pub metrics: HashMap<String, Metric>,
    #[serde(default)]
    pub custom_knowledge: HashMap<String, serde_json::Value>,
}
