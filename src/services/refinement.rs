//! Knowledge refiner (C9 analysis side): mines feedback for scoring-weight
//! adjustments and outcome patterns, grounded in
//! `intelligence/core/refinement.py::KnowledgeRefiner`.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::feedback::{FeedbackQueryFilters, FeedbackType};
use crate::models::{ImprovementPriority, RefinementReport, WeightAdjustment};
use crate::services::feedback::FeedbackStore;
use crate::services::knowledge::KnowledgeStore;
use crate::utils::ApiError;

const MIN_FEEDBACK_FOR_ANALYSIS: i64 = 10;
const LOW_SATISFACTION_THRESHOLD: f64 = 0.5;
const WEIGHT_ADJUSTMENT_THRESHOLD: f64 = 0.3;

const POSITIVE_OUTCOME_KEYWORDS: &[&str] = &["success", "helped", "good", "improved", "increase"];
const NEGATIVE_OUTCOME_KEYWORDS: &[&str] = &["failed", "worse", "bad", "decrease", "wrong"];

pub struct KnowledgeRefiner {
    knowledge: Arc<KnowledgeStore>,
    feedback: Arc<FeedbackStore>,
}

impl KnowledgeRefiner {
    pub fn new(knowledge: Arc<KnowledgeStore>, feedback: Arc<FeedbackStore>) -> Self {
        Self { knowledge, feedback }
    }

    /// Main entry point (spec.md §4.9): below `MIN_FEEDBACK_FOR_ANALYSIS`
    /// entries in the window, the report stops at a single "insufficient
    /// data" suggestion rather than drawing conclusions from noise.
    pub async fn analyze_and_suggest(&self, days: i64, min_confidence: f64) -> Result<RefinementReport, ApiError> {
        let summary = self.feedback.get_summary(None, days).await?;
        let satisfaction_rate =
            if summary.total_count > 0 { summary.positive_count as f64 / summary.total_count as f64 } else { 0.0 };

        let mut report = RefinementReport::new(Utc::now(), summary.total_count, satisfaction_rate);

        if summary.total_count < MIN_FEEDBACK_FOR_ANALYSIS {
            report.general_suggestions.push(format!(
                "Insufficient feedback for detailed analysis. Need at least {MIN_FEEDBACK_FOR_ANALYSIS} entries, currently have {}.",
                summary.total_count
            ));
            return Ok(report);
        }

        self.analyze_scoring_feedback(&mut report, min_confidence).await?;
        self.analyze_outcomes(&mut report).await?;

        if report.satisfaction_rate < LOW_SATISFACTION_THRESHOLD {
            report.general_suggestions.push(format!(
                "Overall satisfaction rate ({:.0}%) is below threshold ({:.0}%). Review negative feedback patterns for improvement opportunities.",
                report.satisfaction_rate * 100.0,
                LOW_SATISFACTION_THRESHOLD * 100.0
            ));
        }

        self.review_metrics(&mut report).await;

        Ok(report)
    }

    /// Groups scoring feedback by `context.category`/`context.factors[]` and
    /// flags any factor with >30% negative ratings across at least 3 data
    /// points. `suggested_weight = current * (1 - negative_rate * 0.5)`.
    async fn analyze_scoring_feedback(&self, report: &mut RefinementReport, min_confidence: f64) -> Result<(), ApiError> {
        let scoring_feedback =
            self.feedback.get_feedback(&FeedbackQueryFilters { feedback_type: Some(FeedbackType::Scoring), limit: 1000, ..Default::default() }).await?;

        let mut factor_feedback: HashMap<String, HashMap<String, Vec<i32>>> = HashMap::new();
        for fb in &scoring_feedback {
            let Some(context) = &fb.context else { continue };
            let category = context.get("category").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
            let factors = context.get("factors").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            let bucket = factor_feedback.entry(category).or_default();
            for factor in factors {
                if let Some(name) = factor.as_str() {
                    bucket.entry(name.to_string()).or_default().push(fb.rating);
                }
            }
        }

        let all_factors = self.knowledge.all_scoring_factors().await;

        for (category, factors) in factor_feedback {
            for (factor_name, ratings) in factors {
                if ratings.len() < 3 {
                    continue;
                }
                let negative_rate = ratings.iter().filter(|r| **r < 0).count() as f64 / ratings.len() as f64;
                if negative_rate <= WEIGHT_ADJUSTMENT_THRESHOLD {
                    continue;
                }

                let current_weight = all_factors
                    .get(&category)
                    .and_then(|fs| fs.iter().find(|f| f.name == factor_name))
                    .map(|f| f.weight)
                    .unwrap_or(0);

                let suggested_weight = (current_weight as f64 * (1.0 - negative_rate * 0.5)) as i64;
                let confidence = (ratings.len() as f64 / 20.0).min(1.0);

                if confidence >= min_confidence {
                    report.weight_adjustments.push(WeightAdjustment {
                        category: category.clone(),
                        factor_name,
                        current_weight,
                        suggested_weight,
                        confidence,
                        reasoning: format!(
                            "{:.0}% negative feedback rate based on {} ratings",
                            negative_rate * 100.0,
                            ratings.len()
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// Keyword-scans `outcome` text on recommendation feedback to derive a
    /// rough success rate (spec.md §4.9; the source does the same
    /// unsupervised keyword match rather than a learned classifier).
    async fn analyze_outcomes(&self, report: &mut RefinementReport) -> Result<(), ApiError> {
        let with_outcomes = self
            .feedback
            .get_feedback(&FeedbackQueryFilters {
                feedback_type: Some(FeedbackType::Recommendation),
                has_outcome: Some(true),
                limit: 1000,
                ..Default::default()
            })
            .await?;

        let mut positive = 0i64;
        let mut negative = 0i64;
        for fb in &with_outcomes {
            let Some(outcome) = &fb.outcome else { continue };
            let lower = outcome.to_lowercase();
            if POSITIVE_OUTCOME_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                positive += 1;
            } else if NEGATIVE_OUTCOME_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                negative += 1;
            }
        }

        let total = positive + negative;
        if total > 0 {
            let success_rate = positive as f64 / total as f64;
            report.metrics_review.insert("recommendation_success_rate".to_string(), serde_json::json!(success_rate));
            report.metrics_review.insert("recommendations_with_outcomes".to_string(), serde_json::json!(total));

            if success_rate < 0.5 {
                report.general_suggestions.push(format!(
                    "Recommendation success rate ({:.0}%) is below 50%. Consider reviewing the factors used for recommendations.",
                    success_rate * 100.0
                ));
            }
        }

        Ok(())
    }

    /// Echoes each metric's thresholds into the report; actual performance
    /// tracking against a metric is future work (matches the source, which
    /// notes this "would ideally pull actual performance data").
    async fn review_metrics(&self, report: &mut RefinementReport) {
        for (name, metric) in self.knowledge.metrics().await {
            report.metrics_review.insert(format!("{name}_target"), serde_json::json!(metric.target));
            report.metrics_review.insert(format!("{name}_warning"), serde_json::json!(metric.warning));
            report.metrics_review.insert(format!("{name}_critical"), serde_json::json!(metric.critical));
        }
    }

    /// Applies only the adjustments meeting `min_confidence`, returning
    /// per-factor success (spec.md §4.9).
    pub async fn apply_weight_adjustments(
        &self,
        adjustments: &[WeightAdjustment],
        min_confidence: f64,
    ) -> Result<HashMap<String, bool>, ApiError> {
        let mut results = HashMap::new();
        for adj in adjustments {
            if adj.confidence < min_confidence {
                results.insert(adj.factor_name.clone(), false);
                continue;
            }
            let applied = self
                .knowledge
                .update_scoring_factor(&adj.category, &adj.factor_name, Some(adj.suggested_weight), None)
                .await?;
            results.insert(adj.factor_name.clone(), applied);
        }
        Ok(results)
    }

    /// Ranks negative-feedback query patterns plus an overall scoring-health
    /// check, highest priority first (spec.md §4.9).
    pub async fn get_improvement_priorities(&self) -> Result<Vec<ImprovementPriority>, ApiError> {
        let mut priorities = Vec::new();

        let patterns = self.feedback.get_negative_feedback_patterns(None, 5).await?;
        for pattern in patterns {
            priorities.push(ImprovementPriority {
                area: "query_handling".to_string(),
                issue: pattern.query,
                frequency: pattern.count,
                priority: (pattern.count as f64 / 10.0).min(1.0),
                suggestion: "Review query handling for this pattern".to_string(),
            });
        }

        let scoring_summary = self.feedback.get_summary(Some(FeedbackType::Scoring), 30).await?;
        if scoring_summary.negative_count > scoring_summary.positive_count {
            priorities.push(ImprovementPriority {
                area: "scoring".to_string(),
                issue: "More negative than positive feedback on scoring".to_string(),
                frequency: scoring_summary.negative_count,
                priority: 0.8,
                suggestion: "Review scoring factor weights and calculations".to_string(),
            });
        }

        priorities.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
        Ok(priorities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::templates;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn refiner() -> (KnowledgeRefiner, Arc<FeedbackStore>, Arc<KnowledgeStore>) {
        let dir = tempfile::tempdir().unwrap();
        let knowledge = Arc::new(KnowledgeStore::new(dir.path().join("knowledge.json"), templates::load("generic")).await.unwrap());
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let feedback = Arc::new(FeedbackStore::new(pool).await.unwrap());
        (KnowledgeRefiner::new(knowledge.clone(), feedback.clone()), feedback, knowledge)
    }

    #[tokio::test]
    async fn insufficient_feedback_short_circuits() {
        let (refiner, feedback, _) = refiner().await;
        feedback.submit_feedback(FeedbackType::Scoring, 1, None, None, None, None, None).await.unwrap();

        let report = refiner.analyze_and_suggest(30, 0.5).await.unwrap();
        assert_eq!(report.feedback_analyzed, 1);
        assert_eq!(report.general_suggestions.len(), 1);
        assert!(report.general_suggestions[0].contains("Insufficient feedback"));
    }

    #[tokio::test]
    async fn suggests_weight_reduction_on_negative_feedback() {
        let (refiner, feedback, _) = refiner().await;
        for i in 0..12 {
            let rating = if i < 9 { -1 } else { 1 };
            feedback
                .submit_feedback(
                    FeedbackType::Scoring,
                    rating,
                    None,
                    None,
                    Some(json!({"category": "perfect_sale", "factors": ["timely"]})),
                    None,
                    None,
                )
                .await
                .unwrap();
        }

        let report = refiner.analyze_and_suggest(30, 0.1).await.unwrap();
        assert_eq!(report.weight_adjustments.len(), 1);
        let adj = &report.weight_adjustments[0];
        assert_eq!(adj.factor_name, "timely");
        assert!(adj.suggested_weight < adj.current_weight);
    }
}
