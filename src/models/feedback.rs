use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    QueryResult,
    Recommendation,
    Scoring,
    Insight,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::QueryResult => "query_result",
            FeedbackType::Recommendation => "recommendation",
            FeedbackType::Scoring => "scoring",
            FeedbackType::Insight => "insight",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "query_result" => Some(Self::QueryResult),
            "recommendation" => Some(Self::Recommendation),
            "scoring" => Some(Self::Scoring),
            "insight" => Some(Self::Insight),
            _ => None,
        }
    }
}

/// `{id, type, rating, timestamp, query?, response?, context?, comment?,
/// user?, outcome?, outcome_timestamp?}` from spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Feedback {
    pub id: i64,
    pub feedback_type: FeedbackType,
    pub rating: i32,
    pub timestamp: DateTime<Utc>,
    pub query: Option<String>,
    pub response: Option<String>,
    pub context: Option<Value>,
    pub comment: Option<String>,
    pub user_id: Option<String>,
    pub outcome: Option<String>,
    pub outcome_timestamp: Option<DateTime<Utc>>,
}

/// Raw row shape as read back from the `feedback` table.
#[derive(Debug, Clone, FromRow)]
pub struct FeedbackRow {
    pub id: i64,
    pub feedback_type: String,
    pub rating: i32,
    pub timestamp: String,
    pub query: Option<String>,
    pub response: Option<String>,
    pub context: Option<String>,
    pub comment: Option<String>,
    pub user_id: Option<String>,
    pub outcome: Option<String>,
    pub outcome_timestamp: Option<String>,
}

impl FeedbackRow {
    pub fn into_feedback(self) -> Feedback {
        Feedback {
            id: self.id,
            feedback_type: FeedbackType::parse(&self.feedback_type)
                .unwrap_or(FeedbackType::QueryResult),
            rating: self.rating,
            timestamp: self
                .timestamp
                .parse()
                .unwrap_or_else(|_| Utc::now()),
            query: self.query,
            response: self.response,
            context: self.context.and_then(|c| serde_json::from_str(&c).ok()),
            comment: self.comment,
            user_id: self.user_id,
            outcome: self.outcome,
            outcome_timestamp: self
                .outcome_timestamp
                .and_then(|t| t.parse().ok()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct FeedbackSummary {
    pub total_count: i64,
    pub positive_count: i64,
    pub negative_count: i64,
    pub neutral_count: i64,
    pub average_rating: f64,
    pub by_type: std::collections::HashMap<String, i64>,
    pub recent_comments: Vec<String>,
}

/// Query filters for `FeedbackStore::get_feedback`, mirroring
/// `FeedbackManager.get_feedback`'s keyword arguments.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct FeedbackQueryFilters {
    pub feedback_type: Option<FeedbackType>,
    pub min_rating: Option<i32>,
    pub max_rating: Option<i32>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub has_outcome: Option<bool>,
    #[serde(default = "default_feedback_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_feedback_limit() -> i64 {
    100
}

/// One row of `FeedbackManager.get_negative_feedback_patterns`: queries that
/// repeatedly draw negative ratings, grouped and ranked by frequency.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NegativeFeedbackPattern {
    pub query: String,
    pub count: i64,
    pub average_rating: f64,
    pub comments: String,
}

/// Scoring feedback stats for one rubric category, part of [`RefinementAid`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CategoryFeedbackStats {
    pub count: i64,
    pub average_rating: f64,
    pub positive_rate: f64,
}

/// The refinement-aid query of spec.md §4.9: a condensed view the
/// refinement analyzer (and an operator inspecting it directly) can use
/// without re-deriving satisfaction and outcome stats from raw feedback.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RefinementAid {
    pub total: i64,
    pub satisfaction_rate: f64,
    pub scoring_feedback_by_category: std::collections::HashMap<String, CategoryFeedbackStats>,
    pub outcome_success_rate: f64,
}
