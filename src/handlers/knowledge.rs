//! `/knowledge/*` (spec.md §6): rubric (scoring factors/rules/metrics),
//! overlay writes, the prompt-ready knowledge card, and the refinement
//! loop (C4/C9).

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::handlers::audit;
use crate::middleware::RequestContext;
use crate::models::audit::AuditEventType;
use crate::models::{BusinessRule, Metric, RefinementReport, ScoringFactor, WeightAdjustment};
use crate::utils::{ApiError, ApiResult};
use crate::AppState;

/// `GET /knowledge/scoring` -> all categories' factors.
pub async fn list_scoring_factors(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Json<HashMap<String, Vec<ScoringFactor>>> {
    let factors = state.knowledge.all_scoring_factors().await;
    audit(&state, &ctx, AuditEventType::KnowledgeView, None, Some("list_scoring"), json!({}), true, None).await;
    Json(factors)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FactorUpdateRequest {
    pub weight: Option<i64>,
    pub description: Option<String>,
}

/// `PUT /knowledge/scoring/{category}/{factor}` — weight/description only
/// (I4: calculation and name are never touched by an overlay update).
pub async fn update_scoring_factor(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((category, factor)): Path<(String, String)>,
    Json(body): Json<FactorUpdateRequest>,
) -> ApiResult<Json<Value>> {
    let result = state.knowledge.update_scoring_factor(&category, &factor, body.weight, body.description.clone()).await;

    audit(
        &state,
        &ctx,
        AuditEventType::KnowledgeUpdate,
        Some(format!("{category}/{factor}")),
        Some("update_scoring_factor"),
        json!({"weight": body.weight}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    if !result? {
        return Err(ApiError::not_found(format!("factor '{factor}' not found in category '{category}'")));
    }
    Ok(Json(json!({"updated": true})))
}

/// `GET /knowledge/rules`.
pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<Vec<BusinessRule>> {
    Json(state.knowledge.business_rules().await)
}

/// `POST /knowledge/rules`.
pub async fn add_rule(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(rule): Json<BusinessRule>,
) -> ApiResult<Json<BusinessRule>> {
    let result = state.knowledge.add_business_rule(rule.clone()).await;

    audit(
        &state,
        &ctx,
        AuditEventType::KnowledgeUpdate,
        Some(rule.name.clone()),
        Some("add_rule"),
        json!({}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    Ok(Json(result?))
}

/// `GET /knowledge/metrics`.
pub async fn list_metrics(State(state): State<Arc<AppState>>) -> Json<HashMap<String, Metric>> {
    Json(state.knowledge.metrics().await)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CustomRequest {
    pub key: String,
    pub value: Value,
}

/// `POST /knowledge/custom`.
pub async fn set_custom(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CustomRequest>,
) -> ApiResult<Json<Value>> {
    let result = state.knowledge.set_custom(body.key.clone(), body.value).await;

    audit(
        &state,
        &ctx,
        AuditEventType::KnowledgeUpdate,
        Some(body.key),
        Some("set_custom"),
        json!({}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    result?;
    Ok(Json(json!({"saved": true})))
}

/// `GET /knowledge/custom/{key}`.
pub async fn get_custom(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> ApiResult<Json<Value>> {
    state.knowledge.custom(&key).await.map(Json).ok_or_else(|| ApiError::not_found(format!("no custom knowledge entry '{key}'")))
}

/// `GET /knowledge/prompt` — the "knowledge card" (GLOSSARY).
pub async fn prompt_card(State(state): State<Arc<AppState>>) -> String {
    state.knowledge.export_for_prompt().await
}

#[derive(Debug, Deserialize)]
pub struct RefinementAnalyzeQuery {
    #[serde(default = "default_days")]
    pub days: i64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_days() -> i64 {
    30
}

fn default_min_confidence() -> f64 {
    0.5
}

/// `GET /knowledge/refinement/analyze` (spec.md §4.9).
pub async fn refinement_analyze(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RefinementAnalyzeQuery>,
) -> ApiResult<Json<RefinementReport>> {
    Ok(Json(state.refiner.analyze_and_suggest(params.days, params.min_confidence).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApplyAdjustmentsRequest {
    pub adjustments: Vec<WeightAdjustment>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

/// `POST /knowledge/refinement/apply` — only adjustments meeting
/// `min_confidence` mutate the knowledge store.
pub async fn refinement_apply(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<ApplyAdjustmentsRequest>,
) -> ApiResult<Json<HashMap<String, bool>>> {
    let result = state.refiner.apply_weight_adjustments(&body.adjustments, body.min_confidence).await;

    audit(
        &state,
        &ctx,
        AuditEventType::KnowledgeUpdate,
        None,
        Some("refinement_apply"),
        json!({"proposed": body.adjustments.len()}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    Ok(Json(result?))
}
