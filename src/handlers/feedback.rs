//! `/feedback/*` (spec.md §6): ratings on past answers, outcome tracking,
//! and the refinement-aid queries that feed C9's weight-adjustment loop.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::handlers::audit;
use crate::middleware::RequestContext;
use crate::models::audit::AuditEventType;
use crate::models::{Feedback, FeedbackQueryFilters, FeedbackSummary, FeedbackType, NegativeFeedbackPattern, RefinementAid};
use crate::utils::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitFeedbackRequest {
    pub feedback_type: FeedbackType,
    pub rating: i32,
    pub query: Option<String>,
    pub response: Option<String>,
    pub context: Option<Value>,
    pub comment: Option<String>,
}

/// `POST /feedback/submit`.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<SubmitFeedbackRequest>,
) -> ApiResult<Json<Value>> {
    let result = state
        .feedback
        .submit_feedback(
            body.feedback_type,
            body.rating,
            body.query.clone(),
            body.response.clone(),
            body.context.clone(),
            body.comment.clone(),
            Some(ctx.user_id.clone()),
        )
        .await;

    audit(
        &state,
        &ctx,
        AuditEventType::DataView,
        None,
        Some("feedback_submit"),
        json!({"feedback_type": body.feedback_type.as_str(), "rating": body.rating}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    Ok(Json(json!({"id": result?})))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OutcomeRequest {
    pub feedback_id: i64,
    pub outcome: String,
}

/// `POST /feedback/outcome`.
pub async fn outcome(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OutcomeRequest>,
) -> ApiResult<Json<Value>> {
    let updated = state.feedback.record_outcome(body.feedback_id, &body.outcome).await?;
    Ok(Json(json!({"updated": updated})))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub feedback_type: Option<FeedbackType>,
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

/// `GET /feedback/summary?feedback_type=&days=`.
pub async fn summary(State(state): State<Arc<AppState>>, Query(params): Query<SummaryQuery>) -> ApiResult<Json<FeedbackSummary>> {
    Ok(Json(state.feedback.get_summary(params.feedback_type, params.days).await?))
}

#[derive(Debug, Deserialize)]
pub struct PatternsQuery {
    pub feedback_type: Option<FeedbackType>,
    #[serde(default = "default_pattern_limit")]
    pub limit: i64,
}

fn default_pattern_limit() -> i64 {
    5
}

/// `GET /feedback/patterns?feedback_type=&limit=`.
pub async fn patterns(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PatternsQuery>,
) -> ApiResult<Json<Vec<NegativeFeedbackPattern>>> {
    Ok(Json(state.feedback.get_negative_feedback_patterns(params.feedback_type, params.limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct RefinementAidQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

/// `GET /feedback/refinement?days=` (spec.md §4.9 refinement-aid query).
pub async fn refinement(State(state): State<Arc<AppState>>, Query(params): Query<RefinementAidQuery>) -> ApiResult<Json<RefinementAid>> {
    Ok(Json(state.feedback.refinement_aid(params.days).await?))
}

/// `GET /feedback/history` — filtered/paginated feedback listing.
pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<FeedbackQueryFilters>,
) -> ApiResult<Json<Vec<Feedback>>> {
    Ok(Json(state.feedback.get_feedback(&filters).await?))
}
