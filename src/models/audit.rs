use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Closed event-type enum from `intelligence/core/audit.py::AuditEventType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    DataUpload,
    DataDelete,
    DataExport,
    QuerySql,
    QueryNatural,
    QuerySemantic,
    DataView,
    SchemaView,
    KnowledgeUpdate,
    KnowledgeView,
    PiiDetected,
    AccessDenied,
    ValidationFailed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataUpload => "data_upload",
            Self::DataDelete => "data_delete",
            Self::DataExport => "data_export",
            Self::QuerySql => "query_sql",
            Self::QueryNatural => "query_natural",
            Self::QuerySemantic => "query_semantic",
            Self::DataView => "data_view",
            Self::SchemaView => "schema_view",
            Self::KnowledgeUpdate => "knowledge_update",
            Self::KnowledgeView => "knowledge_view",
            Self::PiiDetected => "pii_detected",
            Self::AccessDenied => "access_denied",
            Self::ValidationFailed => "validation_failed",
        }
    }
}

/// `{id, event_type, timestamp, user?, session?, ip?, resource?, action?,
/// details, success, error?}` from spec.md §3. Append-only (I5).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub details: Value,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            id: None,
            event_type,
            timestamp: Utc::now(),
            user_id: None,
            session_id: None,
            ip_address: None,
            resource: None,
            action: None,
            details: Value::Object(Default::default()),
            success: true,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AuditQueryFilters {
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}
