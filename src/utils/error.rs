use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// The six error kinds of spec.md §7, surfaced as distinct categories rather
/// than a free-form exception hierarchy.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Input violates identifier/query/limit/predicate rules. 4xx, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Table/collection/feedback id absent. 4xx.
    #[error("not found: {0}")]
    NotFound(String),

    /// Query parsed but failed the read-only check. 4xx.
    #[error("unsafe query: {0}")]
    Unsafe(String),

    /// LLM or vector backend failed or timed out.
    #[error("external service error: {0}")]
    External(String),

    /// Relational or vector store I/O failure. 5xx, not retried automatically.
    #[error("storage error: {0}")]
    Storage(String),

    /// Audit write failure. Logged but never propagated to the user path;
    /// this variant exists so internal plumbing can carry the failure as a
    /// value, but handlers must not let it escape to `IntoResponse`.
    #[error("audit error: {0}")]
    Audit(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unsafe_query(message: impl Into<String>) -> Self {
        Self::Unsafe(message.into())
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::External(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn audit(message: impl Into<String>) -> Self {
        Self::Audit(message.into())
    }

    /// Legacy-style numeric code, grouped by kind, mirroring the range
    /// convention the teacher's error type uses for its own variants.
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 4001,
            Self::NotFound(_) => 4040,
            Self::Unsafe(_) => 4003,
            Self::External(_) => 5021,
            Self::Storage(_) => 5001,
            Self::Audit(_) => 5002,
            Self::Database(_) => 5001,
            Self::Other(_) => 5000,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Unsafe(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::External(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) | Self::Audit(_) | Self::Database(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.error_code();
        let message = self.to_string();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error_code = code, %message, "request failed");
        } else {
            tracing::warn!(error_code = code, %message, "request rejected");
        }

        let response = ApiErrorResponse { code, message, details: None };
        (status, Json(response)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Other(anyhow::anyhow!("JSON error: {err}"))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
