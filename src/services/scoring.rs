//! Scoring engine (C8): evaluates a category's scoring factors against
//! table rows, grounded in `intelligence/core/scoring.py::SaleScorer`.
//! Each factor's `calculation` predicate is parsed into a [`Predicate`]
//! once per scoring pass rather than re-parsed for every row.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{FactorPerformance, ScoreDistribution, ScoredRecord, ScoringFactor};
use crate::services::knowledge::KnowledgeStore;
use crate::services::relational::RelationalStore;
use crate::services::security;
use crate::utils::ApiError;

#[derive(Debug, Clone)]
enum Predicate {
    IsNotNull(String),
    Eq(String, EqValue),
    Le(String, f64),
    Lt(String, f64),
    Ge(String, f64),
    Gt(String, f64),
    RatioGt(String, String, f64),
    Unparseable,
}

#[derive(Debug, Clone)]
enum EqValue {
    Bool(bool),
    Text(String),
}

/// Parses a `calculation` string against the fixed predicate grammar
/// (spec.md §4.8). Ratio form is checked ahead of the plain `>`/`>=` forms
/// since a ratio predicate's right-hand comparison would otherwise match
/// the plain-threshold branch first.
fn parse_predicate(calculation: &str) -> Predicate {
    let lower = calculation.to_lowercase();

    if lower.contains("is not null") {
        let col = calculation.split_whitespace().next().unwrap_or("").to_string();
        return Predicate::IsNotNull(col);
    }

    if let Some(idx) = calculation.find(" = ") {
        let col = calculation[..idx].trim().to_string();
        let raw = calculation[idx + 3..].trim();
        let value = if raw.eq_ignore_ascii_case("true") {
            EqValue::Bool(true)
        } else if raw.eq_ignore_ascii_case("false") {
            EqValue::Bool(false)
        } else {
            EqValue::Text(raw.trim_matches(|c| c == '\'' || c == '"').to_string())
        };
        return Predicate::Eq(col, value);
    }

    if lower.contains(" / ") && lower.contains(" > ") {
        if let Some(slash) = calculation.find(" / ") {
            let numerator = calculation[..slash].trim().to_string();
            let rest = &calculation[slash + 3..];
            if let Some(gt) = rest.find(" > ") {
                let denominator = rest[..gt].trim().to_string();
                if let Ok(threshold) = rest[gt + 3..].trim().parse::<f64>() {
                    return Predicate::RatioGt(numerator, denominator, threshold);
                }
            }
        }
    }

    if let Some(idx) = calculation.find(" <= ") {
        if let Ok(threshold) = calculation[idx + 4..].trim().parse::<f64>() {
            return Predicate::Le(calculation[..idx].trim().to_string(), threshold);
        }
    } else if let Some(idx) = calculation.find(" < ") {
        if let Ok(threshold) = calculation[idx + 3..].trim().parse::<f64>() {
            return Predicate::Lt(calculation[..idx].trim().to_string(), threshold);
        }
    }

    if let Some(idx) = calculation.find(" >= ") {
        if let Ok(threshold) = calculation[idx + 4..].trim().parse::<f64>() {
            return Predicate::Ge(calculation[..idx].trim().to_string(), threshold);
        }
    } else if let Some(idx) = calculation.find(" > ") {
        if let Ok(threshold) = calculation[idx + 3..].trim().parse::<f64>() {
            return Predicate::Gt(calculation[..idx].trim().to_string(), threshold);
        }
    }

    Predicate::Unparseable
}

fn numeric(record: &Map<String, Value>, column: &str) -> Option<f64> {
    match record.get(column) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Returns `(passed, diagnostic)`.
fn evaluate(predicate: &Predicate, record: &Map<String, Value>) -> (bool, String) {
    match predicate {
        Predicate::IsNotNull(col) => {
            let present = record.get(col).is_some_and(|v| !v.is_null());
            (present, if present { "present".to_string() } else { format!("'{col}' is null or missing") })
        },
        Predicate::Eq(col, expected) => {
            let actual = record.get(col);
            let matched = match expected {
                EqValue::Bool(b) => actual.and_then(Value::as_bool) == Some(*b),
                EqValue::Text(text) => actual.and_then(Value::as_str) == Some(text.as_str()),
            };
            (matched, if matched { "matched".to_string() } else { format!("'{col}' did not match expected value") })
        },
        Predicate::Le(col, threshold) => match numeric(record, col) {
            Some(v) => (v <= *threshold, format!("{v} <= {threshold}")),
            None => (false, format!("'{col}' is not numeric")),
        },
        Predicate::Lt(col, threshold) => match numeric(record, col) {
            Some(v) => (v < *threshold, format!("{v} < {threshold}")),
            None => (false, format!("'{col}' is not numeric")),
        },
        Predicate::Ge(col, threshold) => match numeric(record, col) {
            Some(v) => (v >= *threshold, format!("{v} >= {threshold}")),
            None => (false, format!("'{col}' is not numeric")),
        },
        Predicate::Gt(col, threshold) => match numeric(record, col) {
            Some(v) => (v > *threshold, format!("{v} > {threshold}")),
            None => (false, format!("'{col}' is not numeric")),
        },
        Predicate::RatioGt(numerator, denominator, threshold) => {
            match (numeric(record, numerator), numeric(record, denominator)) {
                (Some(n), Some(d)) if d != 0.0 => {
                    let ratio = n / d;
                    (ratio > *threshold, format!("{ratio:.4} > {threshold}"))
                },
                _ => (false, format!("'{numerator}' / '{denominator}' is not a valid ratio")),
            }
        },
        Predicate::Unparseable => (false, "unable to evaluate calculation".to_string()),
    }
}

fn score_record(record: &Map<String, Value>, parsed: &[(ScoringFactor, Predicate)]) -> ScoredRecord {
    let mut total_score = 0i64;
    let mut max_possible = 0i64;
    let mut factor_scores = HashMap::new();
    let mut factor_details = HashMap::new();

    for (factor, predicate) in parsed {
        max_possible += factor.weight;
        let (passed, diagnostic) = evaluate(predicate, record);
        let awarded = if passed { factor.weight } else { 0 };
        total_score += awarded;
        factor_scores.insert(factor.name.clone(), awarded);
        factor_details.insert(factor.name.clone(), diagnostic);
    }

    let percentage = if max_possible > 0 { total_score as f64 / max_possible as f64 * 100.0 } else { 0.0 };

    ScoredRecord { record: record.clone(), total_score, max_possible, percentage, factor_scores, factor_details }
}

/// 5-bucket histogram at thresholds {0, 20, 40, 60, 80} (spec.md §4.8).
fn bucket_label(percentage: f64) -> &'static str {
    if percentage >= 80.0 {
        "excellent (80-100)"
    } else if percentage >= 60.0 {
        "good (60-79)"
    } else if percentage >= 40.0 {
        "average (40-59)"
    } else if percentage >= 20.0 {
        "below_average (20-39)"
    } else {
        "poor (0-19)"
    }
}

fn distribution(scores: &[ScoredRecord]) -> ScoreDistribution {
    let mut buckets = HashMap::new();
    for label in ["excellent (80-100)", "good (60-79)", "average (40-59)", "below_average (20-39)", "poor (0-19)"] {
        buckets.insert(label.to_string(), 0usize);
    }
    if scores.is_empty() {
        return ScoreDistribution { count: 0, min: 0.0, max: 0.0, mean: 0.0, buckets };
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for record in scores {
        min = min.min(record.percentage);
        max = max.max(record.percentage);
        sum += record.percentage;
        *buckets.entry(bucket_label(record.percentage).to_string()).or_insert(0) += 1;
    }

    ScoreDistribution { count: scores.len(), min, max, mean: sum / scores.len() as f64, buckets }
}

fn factor_performance(scores: &[ScoredRecord], factors: &[ScoringFactor]) -> HashMap<String, FactorPerformance> {
    let mut performance = HashMap::new();
    for factor in factors {
        let achieved =
            scores.iter().filter(|s| s.factor_scores.get(&factor.name).copied().unwrap_or(0) > 0).count();
        let total = scores.len();
        let rate = if total > 0 { achieved as f64 / total as f64 } else { 0.0 };
        performance.insert(
            factor.name.clone(),
            FactorPerformance { weight: factor.weight, achieved, total, rate, description: factor.description.clone() },
        );
    }
    performance
}

pub struct ScoringEngine {
    knowledge: Arc<KnowledgeStore>,
    relational: Arc<RelationalStore>,
}

impl ScoringEngine {
    pub fn new(knowledge: Arc<KnowledgeStore>, relational: Arc<RelationalStore>) -> Self {
        Self { knowledge, relational }
    }

    pub async fn score_table(
        &self,
        table: &str,
        category: &str,
        limit: i64,
    ) -> Result<(Vec<ScoredRecord>, ScoreDistribution, HashMap<String, FactorPerformance>), ApiError> {
        let factors = self.knowledge.scoring_factors(category).await;
        if factors.is_empty() {
            return Err(ApiError::not_found(format!("no scoring factors registered for category '{category}'")));
        }

        let parsed: Vec<(ScoringFactor, Predicate)> =
            factors.iter().map(|f| (f.clone(), parse_predicate(&f.calculation))).collect();

        let limit = security::validate_limit(limit, security::DEFAULT_MAX_LIMIT) as usize;
        let rows = self.relational.all_rows(table).await?;

        // Score and rank the whole table before truncating, so `limit`
        // bounds the response rather than which rows get scored
        // (spec.md §4.8; the distribution/factor-performance stats below
        // are computed over this same truncated, ranked set).
        let mut scored: Vec<ScoredRecord> = rows.iter().map(|row| score_record(row, &parsed)).collect();
        scored.sort_by(|a, b| b.percentage.partial_cmp(&a.percentage).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let dist = distribution(&scored);
        let perf = factor_performance(&scored, &factors);

        Ok((scored, dist, perf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::templates::TemplateDefaults;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    fn factor(name: &str, weight: i64, calculation: &str) -> ScoringFactor {
        ScoringFactor { name: name.to_string(), description: name.to_string(), weight, calculation: calculation.to_string() }
    }

    #[test]
    fn scores_is_not_null_and_ratio() {
        let factors = vec![factor("has_id", 20, "id IS NOT NULL"), factor("profitable", 30, "margin / price > 0.15")];
        let parsed: Vec<_> = factors.iter().map(|f| (f.clone(), parse_predicate(&f.calculation))).collect();

        let mut record = Map::new();
        record.insert("id".to_string(), json!(1));
        record.insert("margin".to_string(), json!(20.0));
        record.insert("price".to_string(), json!(100.0));

        let scored = score_record(&record, &parsed);
        assert_eq!(scored.total_score, 50);
        assert_eq!(scored.max_possible, 50);
        assert_eq!(scored.percentage, 100.0);
    }

    #[test]
    fn unparseable_calculation_scores_zero() {
        let factors = vec![factor("mystery", 10, "not a real predicate")];
        let parsed: Vec<_> = factors.iter().map(|f| (f.clone(), parse_predicate(&f.calculation))).collect();
        let scored = score_record(&Map::new(), &parsed);
        assert_eq!(scored.total_score, 0);
        assert_eq!(scored.factor_details.get("mystery").unwrap(), "unable to evaluate calculation");
    }

    #[test]
    fn distribution_buckets_match_labels() {
        let scores = vec![
            ScoredRecord {
                record: Map::new(),
                total_score: 90,
                max_possible: 100,
                percentage: 90.0,
                factor_scores: HashMap::new(),
                factor_details: HashMap::new(),
            },
            ScoredRecord {
                record: Map::new(),
                total_score: 10,
                max_possible: 100,
                percentage: 10.0,
                factor_scores: HashMap::new(),
                factor_details: HashMap::new(),
            },
        ];
        let dist = distribution(&scores);
        assert_eq!(dist.buckets.get("excellent (80-100)"), Some(&1));
        assert_eq!(dist.buckets.get("poor (0-19)"), Some(&1));
    }

    /// Regression test: `score_table` must rank the *entire* table before
    /// truncating to `limit`, not score an arbitrary `limit`-sized slice.
    /// A table of 6 rows scored with `limit: 2` should return the true top
    /// 2 by percentage, including rows past where an unordered
    /// `LIMIT`-first fetch would have cut them off.
    #[tokio::test]
    async fn score_table_ranks_before_truncating() {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let relational = Arc::new(RelationalStore::new(pool));
        let columns = vec![("id".to_string(), crate::models::ColumnType::Text), ("days_to_sale".to_string(), crate::models::ColumnType::Integer)];
        let rows: Vec<Map<String, Value>> = [("r1", 90), ("r2", 80), ("r3", 10), ("r4", 5), ("r5", 95), ("r6", 1)]
            .into_iter()
            .map(|(id, days)| {
                let mut row = Map::new();
                row.insert("id".to_string(), json!(id));
                row.insert("days_to_sale".to_string(), json!(days));
                row
            })
            .collect();
        relational.replace_table("deals", &columns, &rows).await.unwrap();

        let template = TemplateDefaults {
            name: "test".to_string(),
            scoring_factors: HashMap::from([("quick".to_string(), vec![factor("quick_sale", 10, "days_to_sale <= 30")])]),
            rules: vec![],
            metrics: HashMap::new(),
            primary_key_hints: vec![],
        };
        let knowledge = Arc::new(KnowledgeStore::new(std::env::temp_dir().join("scoring_rank_test_nonexistent.json"), template).await.unwrap());

        let scoring = ScoringEngine::new(knowledge, Arc::clone(&relational));
        let (records, _, _) = scoring.score_table("deals", "quick", 2).await.unwrap();

        assert_eq!(records.len(), 2);
        let ids: Vec<&str> = records.iter().map(|r| r.record.get("id").unwrap().as_str().unwrap()).collect();
        assert!(ids.contains(&"r3"));
        assert!(ids.contains(&"r4"));
    }
}
