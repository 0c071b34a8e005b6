//! Audit log (C3). Append-only store over an embedded relational engine,
//! grounded in `intelligence/core/audit.py::AuditLogger`.

pub mod export;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::models::audit::{AuditEvent, AuditQueryFilters};
use crate::utils::ApiError;

pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                user_id TEXT,
                session_id TEXT,
                ip_address TEXT,
                resource TEXT,
                action TEXT,
                details TEXT NOT NULL,
                success INTEGER NOT NULL DEFAULT 1,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(ApiError::from)?;

        for (name, column) in
            [("idx_audit_timestamp", "timestamp"), ("idx_audit_event_type", "event_type"), ("idx_audit_user_id", "user_id")]
        {
            sqlx::query(&format!("CREATE INDEX IF NOT EXISTS {name} ON audit_log({column})"))
                .execute(&pool)
                .await
                .map_err(ApiError::from)?;
        }

        Ok(Self { pool })
    }

    /// Fails only on storage error (spec.md §4.3).
    pub async fn log(&self, event: &AuditEvent) -> Result<i64, ApiError> {
        let details = serde_json::to_string(&event.details).unwrap_or_else(|_| "{}".to_string());
        let row = sqlx::query(
            r#"
            INSERT INTO audit_log
                (event_type, timestamp, user_id, session_id, ip_address, resource, action, details, success, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_type.as_str())
        .bind(event.timestamp.to_rfc3339())
        .bind(&event.user_id)
        .bind(&event.session_id)
        .bind(&event.ip_address)
        .bind(&event.resource)
        .bind(&event.action)
        .bind(details)
        .bind(event.success)
        .bind(&event.error_message)
        .execute(&self.pool)
        .await
        .map_err(ApiError::from)?;

        Ok(row.last_insert_rowid())
    }

    /// Logs and swallows failures, per spec.md §7's Audit kind: "logged but
    /// never propagated to the user path".
    pub async fn log_best_effort(&self, event: &AuditEvent) {
        if let Err(err) = self.log(event).await {
            tracing::error!(error = %err, event_type = event.event_type.as_str(), "audit write failed");
        }
    }

    pub async fn query(&self, filters: &AuditQueryFilters) -> Result<Vec<AuditEvent>, ApiError> {
        let mut sql = String::from(
            "SELECT id, event_type, timestamp, user_id, session_id, ip_address, resource, action, details, success, error_message FROM audit_log WHERE 1=1",
        );
        if filters.event_type.is_some() {
            sql.push_str(" AND event_type = ?");
        }
        if filters.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filters.start.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filters.end.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, AuditRow>(&sql);
        if let Some(event_type) = &filters.event_type {
            query = query.bind(event_type);
        }
        if let Some(user_id) = &filters.user_id {
            query = query.bind(user_id);
        }
        if let Some(start) = &filters.start {
            query = query.bind(start.to_rfc3339());
        }
        if let Some(end) = &filters.end {
            query = query.bind(end.to_rfc3339());
        }
        query = query.bind(filters.limit).bind(filters.offset);

        let rows = query.fetch_all(&self.pool).await.map_err(ApiError::from)?;
        Ok(rows.into_iter().map(AuditRow::into_event).collect())
    }

    pub async fn counts_by_type(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<HashMap<String, i64>, ApiError> {
        let mut sql = String::from("SELECT event_type, COUNT(*) as cnt FROM audit_log WHERE 1=1");
        if start.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if end.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" GROUP BY event_type");

        let mut query = sqlx::query_as::<_, (String, i64)>(&sql);
        if let Some(start) = start {
            query = query.bind(start.to_rfc3339());
        }
        if let Some(end) = end {
            query = query.bind(end.to_rfc3339());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(ApiError::from)?;
        Ok(rows.into_iter().collect())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditEvent>, ApiError> {
        self.query(&AuditQueryFilters { limit, ..Default::default() }).await
    }

    pub async fn purge(&self, retention_days: i64) -> Result<u64, ApiError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let result = sqlx::query("DELETE FROM audit_log WHERE timestamp < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(ApiError::from)?;
        Ok(result.rows_affected())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: i64,
    event_type: String,
    timestamp: String,
    user_id: Option<String>,
    session_id: Option<String>,
    ip_address: Option<String>,
    resource: Option<String>,
    action: Option<String>,
    details: String,
    success: bool,
    error_message: Option<String>,
}

impl AuditRow {
    fn into_event(self) -> AuditEvent {
        use crate::models::audit::AuditEventType as T;
        let event_type = match self.event_type.as_str() {
            "data_upload" => T::DataUpload,
            "data_delete" => T::DataDelete,
            "data_export" => T::DataExport,
            "query_sql" => T::QuerySql,
            "query_natural" => T::QueryNatural,
            "query_semantic" => T::QuerySemantic,
            "data_view" => T::DataView,
            "schema_view" => T::SchemaView,
            "knowledge_update" => T::KnowledgeUpdate,
            "knowledge_view" => T::KnowledgeView,
            "pii_detected" => T::PiiDetected,
            "access_denied" => T::AccessDenied,
            _ => T::ValidationFailed,
        };
        AuditEvent {
            id: Some(self.id),
            event_type,
            timestamp: self.timestamp.parse().unwrap_or_else(|_| Utc::now()),
            user_id: self.user_id,
            session_id: self.session_id,
            ip_address: self.ip_address,
            resource: self.resource,
            action: self.action,
            details: serde_json::from_str(&self.details).unwrap_or(serde_json::Value::Null),
            success: self.success,
            error_message: self.error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit::AuditEventType;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_log() -> AuditLog {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        AuditLog::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn logs_and_queries_an_event() {
        let log = test_log().await;
        let mut event = AuditEvent::new(AuditEventType::QuerySql);
        event.resource = Some("inventory".to_string());
        let id = log.log(&event).await.unwrap();
        assert!(id > 0);

        let events = log.recent(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].resource.as_deref(), Some("inventory"));
    }

    #[tokio::test]
    async fn purge_removes_old_events() {
        let log = test_log().await;
        let mut event = AuditEvent::new(AuditEventType::DataView);
        event.timestamp = Utc::now() - chrono::Duration::days(100);
        log.log(&event).await.unwrap();

        let deleted = log.purge(90).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(log.recent(10).await.unwrap().is_empty());
    }
}
