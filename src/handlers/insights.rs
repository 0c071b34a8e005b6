//! `/insights/*` (spec.md §6): automated, stats-driven findings over
//! stored tables (C10).

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{Insight, InsightReport};
use crate::utils::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TablesQuery {
    /// Comma-separated table names; all analyzable tables if omitted.
    pub tables: Option<String>,
}

fn split_tables(tables: &Option<String>) -> Option<Vec<String>> {
    tables.as_ref().map(|t| t.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
}

/// `GET /insights/generate?tables=a,b`.
pub async fn generate(State(state): State<Arc<AppState>>, Query(params): Query<TablesQuery>) -> ApiResult<Json<InsightReport>> {
    Ok(Json(state.insight.generate_insights(split_tables(&params.tables)).await?))
}

/// `GET /insights/high-priority?tables=a,b`.
pub async fn high_priority(State(state): State<Arc<AppState>>, Query(params): Query<TablesQuery>) -> ApiResult<Json<Vec<Insight>>> {
    Ok(Json(state.insight.get_high_priority_insights(split_tables(&params.tables)).await?))
}

/// `GET /insights/category/{cat}?tables=a,b`.
pub async fn by_category(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
    Query(params): Query<TablesQuery>,
) -> ApiResult<Json<Vec<Insight>>> {
    Ok(Json(state.insight.get_insights_by_category(&category, split_tables(&params.tables)).await?))
}
