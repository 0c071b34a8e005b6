//! Query classification and natural-language-to-SQL translation (C4/C6),
//! grounded in `intelligence/core/classifier.py::QuestionClassifier` and
//! `intelligence/core/sql_engine.py::SQLEngine::natural_to_sql`.

use serde::Deserialize;

use crate::models::{ClassificationResult, QueryType};
use crate::services::llm::LlmClient;
use crate::utils::ApiError;

const STRATEGIC_KEYWORDS: &[&str] =
    &["ideal", "best", "optimal", "should we", "recommend", "strategy", "what makes", "why do", "perfect"];
const SEMANTIC_KEYWORDS: &[&str] = &["similar", "like this", "find like", "pattern", "common"];

/// Routes a question to the SQL/semantic/strategic/hybrid path (spec.md
/// §4.6). Prefers the LLM classifier but always has a deterministic
/// fallback so the orchestrator never stalls on a flaky external call.
pub struct Classifier {
    llm: LlmClient,
    temperature: f64,
    timeout_secs: u64,
}

impl Classifier {
    pub fn new(llm: LlmClient, temperature: f64, timeout_secs: u64) -> Self {
        Self { llm, temperature, timeout_secs }
    }

    /// LLM-backed classification. Falls back to [`classify_simple`] with a
    /// 0.5 confidence and a "Classification failed" reasoning on any call
    /// or parse failure, never surfacing the error to the caller (matches
    /// the source's broad `except Exception` around the Brain call).
    pub async fn classify(&self, question: &str, schema_card: &str) -> ClassificationResult {
        let prompt = classification_prompt(question, schema_card);
        match self.llm.complete(&prompt, self.temperature, self.timeout_secs, 500).await {
            Ok(response) => parse_classification(&response, question),
            Err(err) => {
                tracing::warn!(error = %err, "classification call failed, falling back to rules");
                let mut fallback = classify_simple(question);
                fallback.confidence = 0.5;
                fallback.reasoning = "Classification failed".to_string();
                fallback
            },
        }
    }

    /// Pure rule-based classification with no external dependency (spec.md
    /// §4.6 "deterministic fallback"). Checked in the order the source
    /// checks them: strategic keywords first, then semantic, else SQL.
    pub fn classify_simple(&self, question: &str) -> ClassificationResult {
        classify_simple(question)
    }
}

fn classify_simple(question: &str) -> ClassificationResult {
    let lower = question.to_lowercase();

    if STRATEGIC_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return ClassificationResult {
            query_type: QueryType::Strategic,
            reasoning: "Question contains strategic/advisory language".to_string(),
            needs_sql: true,
            needs_semantic: true,
            needs_knowledge: true,
            suggested_tables: Vec::new(),
            confidence: 0.7,
        };
    }

    if SEMANTIC_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return ClassificationResult {
            query_type: QueryType::Semantic,
            reasoning: "Question asks for similar or pattern-based records".to_string(),
            needs_sql: false,
            needs_semantic: true,
            needs_knowledge: false,
            suggested_tables: Vec::new(),
            confidence: 0.7,
        };
    }

    ClassificationResult {
        query_type: QueryType::Sql,
        reasoning: "Defaulting to direct data lookup".to_string(),
        needs_sql: true,
        needs_semantic: false,
        needs_knowledge: false,
        suggested_tables: Vec::new(),
        confidence: 0.7,
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    query_type: Option<String>,
    reasoning: Option<String>,
    needs_sql: Option<bool>,
    needs_semantic: Option<bool>,
    needs_knowledge: Option<bool>,
    suggested_tables: Option<Vec<String>>,
    confidence: Option<f64>,
}

/// Strips ` ```json` fences before parsing; on malformed JSON, falls back
/// to the same keyword rules as [`classify_simple`] (source's
/// `_parse_response` behavior).
fn parse_classification(response: &str, question: &str) -> ClassificationResult {
    let cleaned = strip_code_fence(response);

    match serde_json::from_str::<RawClassification>(&cleaned) {
        Ok(raw) => {
            let query_type = raw.query_type.as_deref().and_then(QueryType::parse).unwrap_or(QueryType::Sql);
            ClassificationResult {
                query_type,
                reasoning: raw.reasoning.unwrap_or_else(|| "No reasoning provided".to_string()),
                needs_sql: raw.needs_sql.unwrap_or(matches!(query_type, QueryType::Sql | QueryType::Hybrid | QueryType::Strategic)),
                needs_semantic: raw
                    .needs_semantic
                    .unwrap_or(matches!(query_type, QueryType::Semantic | QueryType::Hybrid | QueryType::Strategic)),
                needs_knowledge: raw.needs_knowledge.unwrap_or(matches!(query_type, QueryType::Strategic)),
                suggested_tables: raw.suggested_tables.unwrap_or_default(),
                confidence: raw.confidence.unwrap_or(0.5),
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "could not parse classifier response, using keyword fallback");
            classify_simple(question)
        },
    }
}

fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let without_fence = match trimmed.strip_prefix("```") {
        Some(rest) => rest.strip_suffix("```").unwrap_or(rest),
        None => trimmed,
    };
    // Drop a leading language tag line (```sql, ```json, ...).
    let without_lang = match without_fence.split_once('\n') {
        Some((first_line, rest)) if !first_line.trim().is_empty() && !first_line.contains(char::is_whitespace) => rest,
        _ => without_fence,
    };
    without_lang.trim().to_string()
}

fn classification_prompt(question: &str, schema_card: &str) -> String {
    format!(
        "You are classifying a business question so it can be routed to the right data source.\n\n\
         Schema:\n{schema_card}\n\n\
         Question: {question}\n\n\
         Classify this question as one of: sql, semantic, strategic, hybrid.\n\
         - sql: needs a direct database lookup or aggregation\n\
         - semantic: needs similarity/pattern search over past records\n\
         - strategic: needs advisory reasoning over what 'good' looks like\n\
         - hybrid: needs more than one of the above\n\n\
         Respond with JSON only: {{\"query_type\": \"...\", \"reasoning\": \"...\", \"needs_sql\": bool, \
         \"needs_semantic\": bool, \"needs_knowledge\": bool, \"suggested_tables\": [...], \"confidence\": 0.0-1.0}}"
    )
}

/// Translates a natural-language question into a single read-only SQL
/// statement against the known schema (spec.md §4.6), grounded in
/// `SQLEngine.natural_to_sql`/`_extract_sql`/`explain_results`.
pub struct NlToSql {
    llm: LlmClient,
    timeout_secs: u64,
}

impl NlToSql {
    pub fn new(llm: LlmClient, timeout_secs: u64) -> Self {
        Self { llm, timeout_secs }
    }

    /// Returns the extracted SQL string. The prompt instructs the model to
    /// emit `SELECT 'Cannot answer: <reason>' AS error` when the schema
    /// can't support the question, so callers should still run the
    /// returned statement through [`crate::services::security::validate_sql_query`].
    pub async fn natural_to_sql(&self, question: &str, schema_card: &str) -> Result<String, ApiError> {
        let prompt = sql_prompt(question, schema_card);
        let response = self.llm.complete(&prompt, 0.0, self.timeout_secs, 500).await?;
        Ok(extract_sql(&response))
    }

    /// Turns a query result into a short natural-language summary for the
    /// end user, rather than handing back a raw table.
    pub async fn explain_results(
        &self,
        question: &str,
        sql: &str,
        columns: &[String],
        row_count: usize,
        sample_rows: &[Vec<serde_json::Value>],
    ) -> Result<String, ApiError> {
        let sample = sample_rows
            .iter()
            .take(5)
            .map(|row| {
                columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, val)| format!("{col}={val}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Question: {question}\n\
             SQL executed: {sql}\n\
             Rows returned: {row_count}\n\
             Sample rows:\n{sample}\n\n\
             Write one or two plain-language sentences answering the question based on this data."
        );

        self.llm.complete(&prompt, 0.3, self.timeout_secs, 300).await
    }
}

fn sql_prompt(question: &str, schema_card: &str) -> String {
    format!(
        "You translate business questions into SQLite SELECT statements.\n\n\
         {schema_card}\n\n\
         Question: {question}\n\n\
         Rules:\n\
         - Use only the exact table and column names from the schema above.\n\
         - Write only a single SELECT statement. Never write INSERT, UPDATE, DELETE, DROP, or any DDL.\n\
         - If the schema cannot answer this question, respond with exactly: \
         SELECT 'Cannot answer: <short reason>' AS error\n\
         - Return only the SQL, no explanation."
    )
}

/// Strips markdown code fences and a trailing semicolon (source's
/// `_extract_sql`).
fn extract_sql(response: &str) -> String {
    let cleaned = strip_code_fence(response);
    cleaned.trim().trim_end_matches(';').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_simple_detects_strategic_language() {
        let result = classify_simple("What makes the ideal sale?");
        assert_eq!(result.query_type, QueryType::Strategic);
        assert!(result.needs_knowledge);
    }

    #[test]
    fn classify_simple_detects_semantic_language() {
        let result = classify_simple("Find deals similar to this one");
        assert_eq!(result.query_type, QueryType::Semantic);
        assert!(!result.needs_sql);
    }

    #[test]
    fn classify_simple_defaults_to_sql() {
        let result = classify_simple("How many cars sold last month?");
        assert_eq!(result.query_type, QueryType::Sql);
    }

    #[test]
    fn extracts_sql_from_fenced_response() {
        let response = "```sql\nSELECT * FROM cars;\n```";
        assert_eq!(extract_sql(response), "SELECT * FROM cars");
    }

    #[test]
    fn parses_classification_json_with_fence() {
        let response = "```json\n{\"query_type\": \"semantic\", \"reasoning\": \"similar cars\", \
             \"needs_sql\": false, \"needs_semantic\": true, \"needs_knowledge\": false, \
             \"suggested_tables\": [\"cars\"], \"confidence\": 0.9}\n```";
        let result = parse_classification(response, "ignored");
        assert_eq!(result.query_type, QueryType::Semantic);
        assert_eq!(result.suggested_tables, vec!["cars".to_string()]);
    }

    #[test]
    fn malformed_json_falls_back_to_keywords() {
        let result = parse_classification("not json at all", "recommend the best strategy");
        assert_eq!(result.query_type, QueryType::Strategic);
    }
}
