//! `/data/*` (spec.md §6): upload, table lifecycle, schema, and preview.

use axum::extract::{Multipart, Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::handlers::audit;
use crate::middleware::RequestContext;
use crate::models::audit::AuditEventType;
use crate::models::{ColumnInfo, CollectionInfo, IngestResult};
use crate::services::security;
use crate::utils::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct TableSummary {
    pub name: String,
    pub row_count: i64,
    pub columns: Vec<ColumnInfo>,
    pub vector_collection: CollectionInfo,
}

/// `POST /data/upload` (multipart CSV, optional `table_name` / `primary_key` fields).
#[utoipa::path(post, path = "/data/upload", responses((status = 200, body = IngestResult)))]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    mut multipart: Multipart,
) -> ApiResult<Json<IngestResult>> {
    let mut csv_bytes: Option<Vec<u8>> = None;
    let mut table_name: Option<String> = None;
    let mut primary_key: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::validation(format!("malformed multipart body: {e}")))? {
        match field.name().unwrap_or("") {
            "table_name" => table_name = Some(field.text().await.unwrap_or_default()),
            "primary_key" => primary_key = Some(field.text().await.unwrap_or_default()),
            _ => {
                let bytes = field.bytes().await.map_err(|e| ApiError::validation(format!("could not read upload: {e}")))?;
                csv_bytes = Some(bytes.to_vec());
            },
        }
    }

    let Some(csv_bytes) = csv_bytes else {
        return Err(ApiError::validation("no file field found in multipart body"));
    };

    let result = state.ingestion.ingest_csv(&csv_bytes, table_name.as_deref(), primary_key.as_deref()).await;

    audit(
        &state,
        &ctx,
        AuditEventType::DataUpload,
        table_name.clone(),
        Some("upload"),
        json!({"table_name": table_name}),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    let result = result?;
    if result.pii_summary.records_with_pii > 0 {
        audit(
            &state,
            &ctx,
            AuditEventType::PiiDetected,
            Some(result.table_name.clone()),
            Some("upload"),
            json!({"records_with_pii": result.pii_summary.records_with_pii, "types": result.pii_summary.counts_by_type}),
            true,
            None,
        )
        .await;
    }

    Ok(Json(result))
}

/// `GET /data/tables` -> `[{name, row_count, columns, vector_collection}]`.
#[utoipa::path(get, path = "/data/tables", responses((status = 200, body = [TableSummary])))]
pub async fn list_tables(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TableSummary>>> {
    let schema = state.relational.schema().await?;
    let mut tables = Vec::with_capacity(schema.len());
    for info in schema.into_values() {
        let vector_collection = state.vector.get_collection_info(&info.name).await;
        tables.push(TableSummary { name: info.name, row_count: info.row_count, columns: info.columns, vector_collection });
    }
    tables.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(tables))
}

/// `GET /data/tables/{name}/schema`.
#[utoipa::path(get, path = "/data/tables/{name}/schema", responses((status = 200, body = crate::models::TableInfo)))]
pub async fn table_schema(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<crate::models::TableInfo>> {
    let info = state.relational.table_info(&name).await;
    audit(&state, &ctx, AuditEventType::SchemaView, Some(name.clone()), Some("schema"), json!({}), info.is_ok(), info.as_ref().err().map(|e| e.to_string())).await;
    Ok(Json(info?))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    #[serde(default = "default_preview_limit")]
    pub limit: i64,
}

fn default_preview_limit() -> i64 {
    20
}

/// `GET /data/tables/{name}/preview?limit=`.
#[utoipa::path(get, path = "/data/tables/{name}/preview", responses((status = 200, description = "rows as column maps")))]
pub async fn table_preview(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(name): Path<String>,
    Query(params): Query<PreviewQuery>,
) -> ApiResult<Json<Vec<serde_json::Map<String, serde_json::Value>>>> {
    let limit = security::validate_limit(params.limit, security::DEFAULT_MAX_LIMIT);
    let rows = state.relational.preview_table(&name, limit).await;
    audit(&state, &ctx, AuditEventType::DataView, Some(name.clone()), Some("preview"), json!({"limit": limit}), rows.is_ok(), rows.as_ref().err().map(|e| e.to_string())).await;
    Ok(Json(rows?))
}

/// `DELETE /data/tables/{name}` — drops the table and its vector
/// collection together (I3: a collection exists iff its table exists).
#[utoipa::path(delete, path = "/data/tables/{name}", responses((status = 200, description = "table and collection deleted")))]
pub async fn delete_table(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state.relational.delete_table(&name).await;
    if matches!(deleted, Ok(true)) {
        state.vector.delete_collection(&name).await.ok();
    }

    audit(
        &state,
        &ctx,
        AuditEventType::DataDelete,
        Some(name.clone()),
        Some("delete"),
        json!({}),
        deleted.is_ok(),
        deleted.as_ref().err().map(|e| e.to_string()),
    )
    .await;

    let deleted = deleted?;
    if !deleted {
        return Err(ApiError::not_found(format!("table '{name}' not found")));
    }
    Ok(Json(json!({"deleted": true, "table_name": name})))
}
