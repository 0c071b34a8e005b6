//! `/query/*` (spec.md §6): natural-language Q&A, safe raw SQL, similarity
//! search, rubric scoring, and cross-record pattern mining.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::handlers::audit;
use crate::middleware::RequestContext;
use crate::models::audit::AuditEventType;
use crate::models::{FactorPerformance, IntelligenceResponse, PatternResult, ScoreDistribution, ScoredRecord, SimilarRecord};
use crate::services::relational::QueryResult;
use crate::utils::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub simple_classifier: bool,
}

/// `POST /query/ask {question}`.
#[utoipa::path(post, path = "/query/ask", responses((status = 200, body = IntelligenceResponse)))]
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<AskRequest>,
) -> ApiResult<Json<IntelligenceResponse>> {
    if body.question.trim().is_empty() {
        return Err(ApiError::validation("question cannot be empty"));
    }

    let result = if body.simple_classifier {
        state.orchestrator.ask_with_simple_classifier(&body.question).await
    } else {
        state.orchestrator.ask(&body.question).await
    };

    audit(
        &state,
        &ctx,
        AuditEventType::QueryNatural,
        None,
        Some("ask"),
        json!({"question": body.question, "classification": result.as_ref().ok().and_then(|r| r.classification.clone())}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    Ok(Json(result?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SqlRequest {
    pub sql: String,
}

/// `POST /query/sql {sql}` — 4xx on validator rejection (I6).
#[utoipa::path(post, path = "/query/sql", responses((status = 200, body = QueryResult), (status = 400, description = "not a read-only single-statement SELECT")))]
pub async fn sql(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<SqlRequest>,
) -> ApiResult<Json<QueryResult>> {
    let result = state.relational.execute_select(&body.sql).await;

    audit(
        &state,
        &ctx,
        AuditEventType::QuerySql,
        None,
        Some("sql"),
        json!({"sql": body.sql}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    Ok(Json(result?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SimilarRequest {
    pub table_name: String,
    pub query: Option<String>,
    pub record_id: Option<String>,
    #[serde(default = "default_similar_limit")]
    pub limit: usize,
}

fn default_similar_limit() -> usize {
    10
}

/// `POST /query/similar {table_name, (query|record_id), limit}`.
#[utoipa::path(post, path = "/query/similar", responses((status = 200, body = [SimilarRecord]), (status = 404, description = "no such collection")))]
pub async fn similar(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<SimilarRequest>,
) -> ApiResult<Json<Vec<SimilarRecord>>> {
    let result = run_similar(&state, &body).await;

    audit(
        &state,
        &ctx,
        AuditEventType::QuerySemantic,
        Some(body.table_name.clone()),
        Some("similar"),
        json!({"query": body.query, "record_id": body.record_id}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    Ok(Json(result?))
}

async fn run_similar(state: &Arc<AppState>, body: &SimilarRequest) -> Result<Vec<SimilarRecord>, ApiError> {
    if !state.vector.list_collections().await.iter().any(|c| c == &body.table_name) {
        return Err(ApiError::not_found(format!("no vector collection for table '{}'", body.table_name)));
    }

    if let Some(record_id) = &body.record_id {
        return state.vector.search_by_example(&body.table_name, record_id, body.limit).await;
    }
    if let Some(query) = &body.query {
        return state.vector.search_similar(&body.table_name, query, body.limit).await;
    }
    Err(ApiError::validation("either 'query' or 'record_id' is required"))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ScoreRequest {
    pub table_name: String,
    pub category: String,
    #[serde(default = "default_score_limit")]
    pub limit: i64,
}

fn default_score_limit() -> i64 {
    500
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScoreResponse {
    pub records: Vec<ScoredRecord>,
    pub distribution: ScoreDistribution,
    pub factor_performance: std::collections::HashMap<String, FactorPerformance>,
}

/// `POST /query/score {table_name, category, limit?}`, descending by
/// percentage (spec.md §4.8).
#[utoipa::path(post, path = "/query/score", responses((status = 200, body = ScoreResponse)))]
pub async fn score(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<ScoreRequest>,
) -> ApiResult<Json<ScoreResponse>> {
    let result = state.scoring.score_table(&body.table_name, &body.category, body.limit).await;

    audit(
        &state,
        &ctx,
        AuditEventType::DataView,
        Some(body.table_name.clone()),
        Some("score"),
        json!({"category": body.category}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    // `score_table` already ranks the whole table descending before
    // truncating to `limit`, so the result arrives pre-sorted.
    let (records, distribution, factor_performance) = result?;

    Ok(Json(ScoreResponse { records, distribution, factor_performance }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PatternsRequest {
    pub table_name: String,
    pub record_ids: Vec<String>,
}

/// `POST /query/patterns {table_name, record_ids}` ->
/// `{sample_count, frequent_values, numeric_ranges}`.
#[utoipa::path(post, path = "/query/patterns", responses((status = 200, body = PatternResult)))]
pub async fn patterns(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<PatternsRequest>,
) -> ApiResult<Json<PatternResult>> {
    let result = state.vector.find_patterns(&body.table_name, &body.record_ids).await;

    audit(
        &state,
        &ctx,
        AuditEventType::QuerySemantic,
        Some(body.table_name.clone()),
        Some("patterns"),
        json!({"record_count": body.record_ids.len()}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    Ok(Json(result?))
}
