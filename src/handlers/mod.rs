//! HTTP surface (spec.md §6). Each module maps one row-group of the
//! endpoint table onto the engines wired up in [`crate::AppState`]; this
//! module carries only the state type and the one cross-cutting helper
//! every handler needs — writing an audit event without letting an audit
//! failure fail the request (spec.md §5, §7).

pub mod data;
pub mod feedback;
pub mod insights;
pub mod knowledge;
pub mod query;

use serde_json::Value;
use std::sync::Arc;

use crate::middleware::RequestContext;
use crate::models::audit::{AuditEvent, AuditEventType};
use crate::AppState;

/// Writes one audit event (C3/C13) from the request context the
/// middleware attached, best-effort per spec.md §7 "Audit — Logged but
/// never propagated to the user path".
pub(crate) async fn audit(
    state: &Arc<AppState>,
    ctx: &RequestContext,
    event_type: AuditEventType,
    resource: Option<String>,
    action: Option<&str>,
    details: Value,
    success: bool,
    error: Option<String>,
) {
    let mut event = AuditEvent::new(event_type);
    event.user_id = Some(ctx.user_id.clone());
    event.session_id = Some(ctx.session_id.clone());
    event.ip_address = Some(ctx.ip_address.clone());
    event.resource = resource;
    event.action = action.map(str::to_string);
    event.details = details;
    event.success = success;
    event.error_message = error;
    state.audit.log_best_effort(&event).await;
}
