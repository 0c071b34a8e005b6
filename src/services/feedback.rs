//! Feedback store (C9 input side): captures ratings and outcomes on past
//! answers, grounded in `intelligence/core/feedback.py::FeedbackManager`.
//! Schema and indexing mirror [`crate::services::audit::AuditLog`].

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::models::feedback::{
    CategoryFeedbackStats, Feedback, FeedbackQueryFilters, FeedbackRow, FeedbackSummary, FeedbackType,
    NegativeFeedbackPattern, RefinementAid,
};
use crate::utils::ApiError;

/// Outcome text fragments counted as a success for
/// `FeedbackStore::refinement_aid`'s outcome-success rate, mirroring the
/// keyword check `KnowledgeRefiner` applies to recommendation outcomes.
const SUCCESS_KEYWORDS: &[&str] = &["success", "improved", "resolved", "helped", "worked"];

pub struct FeedbackStore {
    pool: SqlitePool,
}

impl FeedbackStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feedback_type TEXT NOT NULL,
                rating INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                query TEXT,
                response TEXT,
                context TEXT,
                comment TEXT,
                user_id TEXT,
                outcome TEXT,
                outcome_timestamp TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(ApiError::from)?;

        for (name, column) in
            [("idx_feedback_type", "feedback_type"), ("idx_feedback_rating", "rating"), ("idx_feedback_timestamp", "timestamp")]
        {
            sqlx::query(&format!("CREATE INDEX IF NOT EXISTS {name} ON feedback({column})"))
                .execute(&pool)
                .await
                .map_err(ApiError::from)?;
        }

        Ok(Self { pool })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn submit_feedback(
        &self,
        feedback_type: FeedbackType,
        rating: i32,
        query: Option<String>,
        response: Option<String>,
        context: Option<Value>,
        comment: Option<String>,
        user_id: Option<String>,
    ) -> Result<i64, ApiError> {
        let context = context.map(|c| serde_json::to_string(&c).unwrap_or_default());
        let row = sqlx::query(
            r#"
            INSERT INTO feedback (feedback_type, rating, timestamp, query, response, context, comment, user_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(feedback_type.as_str())
        .bind(rating)
        .bind(Utc::now().to_rfc3339())
        .bind(query)
        .bind(response)
        .bind(context)
        .bind(comment)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::from)?;

        Ok(row.last_insert_rowid())
    }

    pub async fn record_outcome(&self, feedback_id: i64, outcome: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("UPDATE feedback SET outcome = ?, outcome_timestamp = ? WHERE id = ?")
            .bind(outcome)
            .bind(Utc::now().to_rfc3339())
            .bind(feedback_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::from)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_feedback(&self, filters: &FeedbackQueryFilters) -> Result<Vec<Feedback>, ApiError> {
        let mut sql = String::from(
            "SELECT id, feedback_type, rating, timestamp, query, response, context, comment, user_id, outcome, outcome_timestamp FROM feedback WHERE 1=1",
        );
        if filters.feedback_type.is_some() {
            sql.push_str(" AND feedback_type = ?");
        }
        if filters.min_rating.is_some() {
            sql.push_str(" AND rating >= ?");
        }
        if filters.max_rating.is_some() {
            sql.push_str(" AND rating <= ?");
        }
        if filters.start.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filters.end.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        if let Some(has_outcome) = filters.has_outcome {
            sql.push_str(if has_outcome { " AND outcome IS NOT NULL" } else { " AND outcome IS NULL" });
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, FeedbackRow>(&sql);
        if let Some(t) = &filters.feedback_type {
            query = query.bind(t.as_str());
        }
        if let Some(r) = filters.min_rating {
            query = query.bind(r);
        }
        if let Some(r) = filters.max_rating {
            query = query.bind(r);
        }
        if let Some(start) = filters.start {
            query = query.bind(start.to_rfc3339());
        }
        if let Some(end) = filters.end {
            query = query.bind(end.to_rfc3339());
        }
        query = query.bind(filters.limit).bind(filters.offset);

        let rows = query.fetch_all(&self.pool).await.map_err(ApiError::from)?;
        Ok(rows.into_iter().map(FeedbackRow::into_feedback).collect())
    }

    /// Totals, average rating, per-type counts, and the last five comments
    /// within a `days`-wide trailing window (spec.md §4.9).
    pub async fn get_summary(&self, feedback_type: Option<FeedbackType>, days: i64) -> Result<FeedbackSummary, ApiError> {
        let since = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();

        let mut sql = String::from(
            "SELECT COUNT(*), \
             SUM(CASE WHEN rating > 0 THEN 1 ELSE 0 END), \
             SUM(CASE WHEN rating < 0 THEN 1 ELSE 0 END), \
             SUM(CASE WHEN rating = 0 THEN 1 ELSE 0 END), \
             COALESCE(AVG(rating), 0.0) \
             FROM feedback WHERE timestamp >= ?",
        );
        if feedback_type.is_some() {
            sql.push_str(" AND feedback_type = ?");
        }
        let mut query = sqlx::query_as::<_, (i64, Option<i64>, Option<i64>, Option<i64>, f64)>(&sql).bind(&since);
        if let Some(t) = &feedback_type {
            query = query.bind(t.as_str());
        }
        let (total, positive, negative, neutral, average) = query.fetch_one(&self.pool).await.map_err(ApiError::from)?;

        let mut by_type_sql = String::from("SELECT feedback_type, COUNT(*) FROM feedback WHERE timestamp >= ?");
        if feedback_type.is_some() {
            by_type_sql.push_str(" AND feedback_type = ?");
        }
        by_type_sql.push_str(" GROUP BY feedback_type");
        let mut by_type_query = sqlx::query_as::<_, (String, i64)>(&by_type_sql).bind(&since);
        if let Some(t) = &feedback_type {
            by_type_query = by_type_query.bind(t.as_str());
        }
        let by_type: HashMap<String, i64> = by_type_query.fetch_all(&self.pool).await.map_err(ApiError::from)?.into_iter().collect();

        let mut comments_sql =
            String::from("SELECT comment FROM feedback WHERE timestamp >= ? AND comment IS NOT NULL AND comment != ''");
        if feedback_type.is_some() {
            comments_sql.push_str(" AND feedback_type = ?");
        }
        comments_sql.push_str(" ORDER BY timestamp DESC LIMIT 5");
        let mut comments_query = sqlx::query_as::<_, (String,)>(&comments_sql).bind(&since);
        if let Some(t) = &feedback_type {
            comments_query = comments_query.bind(t.as_str());
        }
        let recent_comments =
            comments_query.fetch_all(&self.pool).await.map_err(ApiError::from)?.into_iter().map(|(c,)| c).collect();

        Ok(FeedbackSummary {
            total_count: total,
            positive_count: positive.unwrap_or(0),
            negative_count: negative.unwrap_or(0),
            neutral_count: neutral.unwrap_or(0),
            average_rating: average,
            by_type,
            recent_comments,
        })
    }

    /// Queries repeatedly drawing negative feedback, ranked by frequency
    /// then by how negative they skew (spec.md §4.9).
    pub async fn get_negative_feedback_patterns(
        &self,
        feedback_type: Option<FeedbackType>,
        limit: i64,
    ) -> Result<Vec<NegativeFeedbackPattern>, ApiError> {
        let mut sql = String::from(
            "SELECT query, COUNT(*) as cnt, COALESCE(AVG(rating), 0.0) as avg_rating, \
             GROUP_CONCAT(COALESCE(NULLIF(comment, ''), ''), ' | ') as comments \
             FROM feedback WHERE rating < 0 AND query IS NOT NULL",
        );
        if feedback_type.is_some() {
            sql.push_str(" AND feedback_type = ?");
        }
        sql.push_str(" GROUP BY query HAVING cnt >= 1 ORDER BY cnt DESC, avg_rating ASC LIMIT ?");

        let mut query = sqlx::query_as::<_, (String, i64, f64, Option<String>)>(&sql);
        if let Some(t) = &feedback_type {
            query = query.bind(t.as_str());
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await.map_err(ApiError::from)?;
        Ok(rows
            .into_iter()
            .map(|(query, count, average_rating, comments)| NegativeFeedbackPattern {
                query,
                count,
                average_rating,
                comments: comments.unwrap_or_default(),
            })
            .collect())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<Feedback>, ApiError> {
        self.get_feedback(&crate::models::feedback::FeedbackQueryFilters { limit, ..Default::default() }).await
    }

    /// The refinement-aid query of spec.md §4.9: `{total, satisfaction_rate,
    /// scoring_feedback grouped by category, outcome_success_rate}`. Feeds
    /// the refinement analyzer and is exposed directly at
    /// `GET /feedback/refinement`.
    pub async fn refinement_aid(&self, days: i64) -> Result<RefinementAid, ApiError> {
        let since = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();

        let (total, positive): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), SUM(CASE WHEN rating > 0 THEN 1 ELSE 0 END) FROM feedback WHERE timestamp >= ?",
        )
        .bind(&since)
        .fetch_one(&self.pool)
        .await
        .map(|(total, positive): (i64, Option<i64>)| (total, positive.unwrap_or(0)))
        .map_err(ApiError::from)?;
        let satisfaction_rate = if total > 0 { positive as f64 / total as f64 } else { 0.0 };

        let scoring_rows: Vec<(Option<String>, i64, f64)> = sqlx::query_as(
            "SELECT json_extract(context, '$.category'), COUNT(*), COALESCE(AVG(rating), 0.0) \
             FROM feedback WHERE timestamp >= ? AND feedback_type = ? GROUP BY json_extract(context, '$.category')",
        )
        .bind(&since)
        .bind(FeedbackType::Scoring.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::from)?;

        let positive_counts: HashMap<String, i64> = sqlx::query_as::<_, (Option<String>, i64)>(
            "SELECT json_extract(context, '$.category'), COUNT(*) FROM feedback \
             WHERE timestamp >= ? AND feedback_type = ? AND rating > 0 GROUP BY json_extract(context, '$.category')",
        )
        .bind(&since)
        .bind(FeedbackType::Scoring.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::from)?
        .into_iter()
        .filter_map(|(category, count)| category.map(|c| (c, count)))
        .collect();

        let scoring_feedback_by_category = scoring_rows
            .into_iter()
            .filter_map(|(category, count, average_rating)| {
                category.map(|category| {
                    let positive_rate = positive_counts.get(&category).copied().unwrap_or(0) as f64 / count as f64;
                    (category, CategoryFeedbackStats { count, average_rating, positive_rate })
                })
            })
            .collect();

        let outcomes: Vec<(String,)> =
            sqlx::query_as("SELECT outcome FROM feedback WHERE timestamp >= ? AND outcome IS NOT NULL")
                .bind(&since)
                .fetch_all(&self.pool)
                .await
                .map_err(ApiError::from)?;
        let outcome_success_rate = if outcomes.is_empty() {
            0.0
        } else {
            let successes =
                outcomes.iter().filter(|(o,)| SUCCESS_KEYWORDS.iter().any(|kw| o.to_lowercase().contains(kw))).count();
            successes as f64 / outcomes.len() as f64
        };

        Ok(RefinementAid { total, satisfaction_rate, scoring_feedback_by_category, outcome_success_rate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> FeedbackStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        FeedbackStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn submits_and_summarizes_feedback() {
        let store = store().await;
        store
            .submit_feedback(FeedbackType::Scoring, 1, Some("how many".to_string()), None, None, None, None)
            .await
            .unwrap();
        store
            .submit_feedback(FeedbackType::Scoring, -1, Some("how many".to_string()), None, None, Some("wrong".to_string()), None)
            .await
            .unwrap();

        let summary = store.get_summary(None, 30).await.unwrap();
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.positive_count, 1);
        assert_eq!(summary.negative_count, 1);
    }

    #[tokio::test]
    async fn records_outcome() {
        let store = store().await;
        let id = store.submit_feedback(FeedbackType::Recommendation, 1, None, None, None, None, None).await.unwrap();
        assert!(store.record_outcome(id, "success, inventory improved").await.unwrap());

        let rows = store.recent(10).await.unwrap();
        assert_eq!(rows[0].outcome.as_deref(), Some("success, inventory improved"));
    }

    #[tokio::test]
    async fn negative_patterns_group_by_query() {
        let store = store().await;
        for _ in 0..3 {
            store
                .submit_feedback(FeedbackType::QueryResult, -1, Some("why no results".to_string()), None, None, None, None)
                .await
                .unwrap();
        }
        let patterns = store.get_negative_feedback_patterns(None, 5).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].count, 3);
    }

    #[tokio::test]
    async fn refinement_aid_groups_scoring_feedback_by_category() {
        let store = store().await;
        let context = serde_json::json!({"category": "perfect_sale"});
        store
            .submit_feedback(FeedbackType::Scoring, 2, None, None, Some(context.clone()), None, None)
            .await
            .unwrap();
        store.submit_feedback(FeedbackType::Scoring, -1, None, None, Some(context), None, None).await.unwrap();
        let id = store.submit_feedback(FeedbackType::Recommendation, 1, None, None, None, None, None).await.unwrap();
        store.record_outcome(id, "the change improved throughput").await.unwrap();

        let aid = store.refinement_aid(30).await.unwrap();
        assert_eq!(aid.total, 3);
        assert!((aid.satisfaction_rate - 2.0 / 3.0).abs() < 1e-9);
        let stats = &aid.scoring_feedback_by_category["perfect_sale"];
        assert_eq!(stats.count, 2);
        assert!((stats.positive_rate - 0.5).abs() < 1e-9);
        assert_eq!(aid.outcome_success_rate, 1.0);
    }
}
