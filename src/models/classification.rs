use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Sql,
    Semantic,
    Strategic,
    Hybrid,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Sql => "sql",
            QueryType::Semantic => "semantic",
            QueryType::Strategic => "strategic",
            QueryType::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sql" => Some(Self::Sql),
            "semantic" => Some(Self::Semantic),
            "strategic" => Some(Self::Strategic),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClassificationResult {
    pub query_type: QueryType,
    pub reasoning: String,
    pub needs_sql: bool,
    pub needs_semantic: bool,
    pub needs_knowledge: bool,
    pub suggested_tables: Vec<String>,
    pub confidence: f64,
}
