//! Intelligence orchestrator (C11): routes a question through
//! classification, context gathering, and synthesis, grounded in
//! `intelligence/core/orchestrator.py::IntelligenceOrchestrator`.

use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::table::TableInfo;
use crate::models::{ClassificationResult, IntelligenceResponse, QueryType, SimilarRecord};
use crate::services::classifier::{Classifier, NlToSql};
use crate::services::knowledge::KnowledgeStore;
use crate::services::llm::LlmClient;
use crate::services::relational::RelationalStore;
use crate::services::scoring::ScoringEngine;
use crate::services::security;
use crate::services::vector::VectorStore;
use crate::utils::ApiError;

/// Row cap carried from context into the synthesis prompt, independent of
/// the row cap applied to the HTTP response (source caps context at 50
/// rows regardless of how many the query actually returned).
const CONTEXT_ROW_LIMIT: usize = 50;
const SEMANTIC_N_RESULTS: usize = 10;

const SYNTHESIS_PROMPT: &str = "You are a business data analyst. Answer the question below using only the \
provided context. Be concise and concrete, citing numbers where available.";

const STRATEGIC_PROMPT: &str = "You are a senior business advisor. Use the provided data, similar-record \
patterns, and the organization's codified knowledge (scoring factors, rules, metrics) to give a \
recommendation, not just a description. Explain the reasoning behind the recommendation.";

pub struct Orchestrator {
    classifier: Classifier,
    nl_to_sql: NlToSql,
    relational: Arc<RelationalStore>,
    vector: Arc<VectorStore>,
    knowledge: Arc<KnowledgeStore>,
    scoring: Arc<ScoringEngine>,
    llm: LlmClient,
    temperature_synthesis: f64,
    timeout_synthesis_secs: u64,
}

struct GatheredContext {
    sql_used: Option<String>,
    supporting_data: Option<Vec<Map<String, Value>>>,
    similar_records: Option<Vec<SimilarRecord>>,
    text_block: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: Classifier,
        nl_to_sql: NlToSql,
        relational: Arc<RelationalStore>,
        vector: Arc<VectorStore>,
        knowledge: Arc<KnowledgeStore>,
        scoring: Arc<ScoringEngine>,
        llm: LlmClient,
        temperature_synthesis: f64,
        timeout_synthesis_secs: u64,
    ) -> Self {
        Self {
            classifier,
            nl_to_sql,
            relational,
            vector,
            knowledge,
            scoring,
            llm,
            temperature_synthesis,
            timeout_synthesis_secs,
        }
    }

    /// Classify -> gather context -> synthesize (spec.md §4.12).
    pub async fn ask(&self, question: &str) -> Result<IntelligenceResponse, ApiError> {
        self.ask_inner(question, false).await
    }

    /// Same pipeline, but routes through the deterministic keyword
    /// classifier instead of the LLM (`simple_classifier` flag on
    /// `POST /query/ask`, spec.md §4.12), e.g. when callers want a
    /// cheap, offline-capable classification step.
    pub async fn ask_with_simple_classifier(&self, question: &str) -> Result<IntelligenceResponse, ApiError> {
        self.ask_inner(question, true).await
    }

    async fn ask_inner(&self, question: &str, simple_classifier: bool) -> Result<IntelligenceResponse, ApiError> {
        let schema = self.relational.schema().await?;
        let schema_card = self.relational.schema_card(&schema);

        let classification = if simple_classifier {
            self.classifier.classify_simple(question)
        } else {
            self.classifier.classify(question, &schema_card).await
        };
        let context = self.gather_context(question, &classification, &schema, &schema_card).await?;
        let answer = self.synthesize(question, &classification, &context).await?;

        Ok(IntelligenceResponse {
            answer,
            supporting_data: context.supporting_data,
            reasoning: classification.reasoning.clone(),
            sql_used: context.sql_used,
            similar_records: context.similar_records.map(|records| records.into_iter().map(|r| json!(r)).collect()),
            classification: Some(classification.query_type.as_str().to_string()),
            confidence: classification.confidence,
        })
    }

    async fn gather_context(
        &self,
        question: &str,
        classification: &ClassificationResult,
        schema: &HashMap<String, TableInfo>,
        schema_card: &str,
    ) -> Result<GatheredContext, ApiError> {
        let mut blocks = Vec::new();
        let mut sql_used = None;
        let mut supporting_data = None;
        let mut similar_records = None;

        if classification.needs_sql {
            let sql = self.nl_to_sql.natural_to_sql(question, schema_card).await?;
            match security::validate_sql_query(&sql, false) {
                Ok(()) => match self.relational.execute_select(&sql).await {
                    Ok(result) => {
                        let limited_rows: Vec<Vec<Value>> = result.rows.iter().take(CONTEXT_ROW_LIMIT).cloned().collect();
                        let maps = rows_to_maps(&result.columns, &limited_rows);
                        blocks.push(format!("SQL query: {sql}\nResults ({} rows):\n{}", result.row_count, maps_to_text(&maps)));
                        sql_used = Some(sql);
                        supporting_data = Some(rows_to_maps(&result.columns, &result.rows));
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, "SQL execution failed during context gathering");
                        blocks.push(format!("SQL query failed: {err}"));
                        sql_used = Some(sql);
                    },
                },
                Err(err) => {
                    blocks.push(format!("Generated SQL was rejected: {err}"));
                    sql_used = Some(sql);
                },
            }
        }

        if classification.needs_semantic {
            let tables = prioritized_tables(question, schema);
            for table in tables {
                let results = self.vector.search_similar(&table, question, SEMANTIC_N_RESULTS).await?;
                if !results.is_empty() {
                    blocks.push(format!("Similar records from '{table}':\n{}", similar_to_text(&results)));
                    similar_records = Some(results);
                    break;
                }
            }
        }

        if classification.needs_knowledge {
            let text = self.knowledge.export_for_prompt().await;
            blocks.push(format!("Organizational knowledge:\n{text}"));
        }

        Ok(GatheredContext { sql_used, supporting_data, similar_records, text_block: blocks.join("\n\n") })
    }

    async fn synthesize(
        &self,
        question: &str,
        classification: &ClassificationResult,
        context: &GatheredContext,
    ) -> Result<String, ApiError> {
        let instructions = if matches!(classification.query_type, QueryType::Strategic) { STRATEGIC_PROMPT } else { SYNTHESIS_PROMPT };

        let prompt = format!("{instructions}\n\nQuestion: {question}\n\nContext:\n{}", context.text_block);

        self.llm.complete(&prompt, self.temperature_synthesis, self.timeout_synthesis_secs, 1000).await
    }

    /// Runs [`Self::ask`], then re-synthesizes the answer against a scoring
    /// breakdown for `table_name`/`score_category` (spec.md §4.12
    /// "scored-enhanced answers"). Falls back to the unscored answer,
    /// unchanged, if the enhancement call fails — the source does the same
    /// rather than surface a broken recommendation.
    pub async fn ask_with_scoring(
        &self,
        question: &str,
        table_name: &str,
        score_category: &str,
    ) -> Result<IntelligenceResponse, ApiError> {
        let base = self.ask(question).await?;

        let (scored, distribution, factor_performance) = match self.scoring.score_table(table_name, score_category, 500).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "scoring unavailable, returning unscored answer");
                return Ok(base);
            },
        };

        // `score_table` already ranks the whole table descending before
        // truncating to the 500-record cap passed above.
        let ranked = scored;
        let top: Vec<_> = ranked.iter().take(5).collect();
        let bottom: Vec<_> = ranked.iter().rev().take(5).collect();

        let score_context = format!(
            "Scoring distribution (category '{score_category}'): count={}, mean={:.1}%, min={:.1}%, max={:.1}%\n\
             Factor performance: {}\n\
             Top scoring records:\n{}\n\
             Bottom scoring records:\n{}",
            distribution.count,
            distribution.mean,
            distribution.min,
            distribution.max,
            factor_performance.iter().map(|(name, perf)| format!("{name}: {:.0}% ({}/{})", perf.rate * 100.0, perf.achieved, perf.total)).collect::<Vec<_>>().join(", "),
            top.iter().map(|r| format!("{:.0}%: {}", r.percentage, maps_to_text(std::slice::from_ref(&r.record)))).collect::<Vec<_>>().join("\n"),
            bottom.iter().map(|r| format!("{:.0}%: {}", r.percentage, maps_to_text(std::slice::from_ref(&r.record)))).collect::<Vec<_>>().join("\n"),
        );

        let prompt = format!(
            "Original question: {question}\n\nInitial answer: {}\n\nScoring breakdown:\n{score_context}\n\n\
             Revise the answer above to incorporate what the scoring breakdown shows. Keep it concise.",
            base.answer
        );

        match self.llm.complete(&prompt, self.temperature_synthesis, self.timeout_synthesis_secs, 1000).await {
            Ok(enhanced) => Ok(IntelligenceResponse { answer: enhanced, ..base }),
            Err(err) => {
                tracing::warn!(error = %err, "score-enhanced synthesis failed, falling back to base answer");
                Ok(base)
            },
        }
    }
}

/// A table is prioritized when the question mentions its name, or its
/// singular form (the source does the same `table.rstrip('s')` check so
/// "car" matches a table named "cars").
fn prioritized_tables(question: &str, schema: &HashMap<String, TableInfo>) -> Vec<String> {
    let lower = question.to_lowercase();
    let mut prioritized = Vec::new();
    let mut rest = Vec::new();
    for table in schema.keys() {
        let singular = table.strip_suffix('s').unwrap_or(table);
        if lower.contains(&table.to_lowercase()) || lower.contains(&singular.to_lowercase()) {
            prioritized.push(table.clone());
        } else {
            rest.push(table.clone());
        }
    }
    prioritized.extend(rest);
    prioritized
}

fn rows_to_maps(columns: &[String], rows: &[Vec<Value>]) -> Vec<Map<String, Value>> {
    rows.iter()
        .map(|row| columns.iter().cloned().zip(row.iter().cloned()).collect::<Map<String, Value>>())
        .collect()
}

fn maps_to_text(maps: &[Map<String, Value>]) -> String {
    maps.iter()
        .map(|row| row.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn similar_to_text(records: &[SimilarRecord]) -> String {
    records
        .iter()
        .map(|r| format!("[{:.2} similarity] {}", r.similarity, maps_to_text(std::slice::from_ref(&r.record))))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::table::{ColumnInfo, ColumnType};

    fn table(name: &str) -> (String, TableInfo) {
        (
            name.to_string(),
            TableInfo { name: name.to_string(), row_count: 1, columns: vec![ColumnInfo { name: "id".to_string(), column_type: ColumnType::Integer, nullable: false, primary_key: true }], sample_rows: None },
        )
    }

    #[test]
    fn prioritizes_table_by_singular_form() {
        let schema: HashMap<String, TableInfo> = [table("cars"), table("dealers")].into_iter().collect();
        let ordered = prioritized_tables("show me a similar car", &schema);
        assert_eq!(ordered[0], "cars");
    }

    #[test]
    fn rows_to_maps_zips_columns_and_values() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let rows = vec![vec![json!(1), json!("x")]];
        let maps = rows_to_maps(&columns, &rows);
        assert_eq!(maps[0]["a"], json!(1));
        assert_eq!(maps[0]["b"], json!("x"));
    }
}
