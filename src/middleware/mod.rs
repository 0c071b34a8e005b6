//! Request audit middleware (C2), grounded in
//! `shared/middleware/audit_middleware.py::AuditMiddleware`. Tags every
//! inbound request with an id, an actor, a session, and a body hash, then
//! proxies the hashed pair into the handler's audit write.

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use sha2::{Digest, Sha256};
use std::time::Instant;
use uuid::Uuid;

use crate::config::AuditConfig;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const AUDIT_TIMESTAMP_HEADER: &str = "x-audit-timestamp";
const DEFAULT_USER_ID: &str = "appliance-admin";

/// Per-request provenance gathered by the middleware and handed to
/// handlers via request extensions, so the audit event a handler writes
/// can cite the same request id, actor, and body hash the response
/// headers advertise.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: String,
    pub session_id: String,
    pub ip_address: String,
    pub body_hash: String,
    pub raw_body: Option<Bytes>,
    pub started_at: Instant,
}

pub async fn audit_middleware(State(config): State<AuditConfig>, req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let headers = req.headers().clone();

    let user_id = header_str(&headers, "x-user-id").unwrap_or_else(|| DEFAULT_USER_ID.to_string());
    let session_id = header_str(&headers, "x-session-id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let peer_ip = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| addr.ip().to_string());
    let ip_address = client_ip(&headers, peer_ip);

    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => Bytes::new(),
    };
    let body_hash = hex_sha256(&body_bytes);

    let context = RequestContext {
        request_id: request_id.clone(),
        user_id,
        session_id,
        ip_address,
        body_hash,
        raw_body: config.debug.then(|| body_bytes.clone()),
        started_at: Instant::now(),
    };

    let mut req = Request::from_parts(parts, Body::from(body_bytes));
    req.extensions_mut().insert(context.clone());

    let mut response = next.run(req).await;

    let duration_ms = context.started_at.elapsed().as_millis();
    tracing::debug!(request_id = %context.request_id, user_id = %context.user_id, duration_ms, "request completed");

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(header::HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    if let Ok(value) = HeaderValue::from_str(&chrono::Utc::now().to_rfc3339()) {
        response.headers_mut().insert(header::HeaderName::from_static(AUDIT_TIMESTAMP_HEADER), value);
    }

    response
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

/// Honors `X-Forwarded-For`/`X-Real-IP`, taking the left-most entry of a
/// comma-separated forwarded-for chain (spec.md §5), then falls back to
/// the socket peer address.
fn client_ip(headers: &HeaderMap, peer: Option<String>) -> String {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        return real_ip;
    }
    peer.unwrap_or_else(|| "unknown".to_string())
}

fn hex_sha256(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn prefers_leftmost_forwarded_for_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5, 10.0.0.1"));
        assert_eq!(client_ip(&headers, None), "203.0.113.5");
    }

    #[test]
    fn falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some("127.0.0.1".to_string())), "127.0.0.1");
    }

    #[test]
    fn hashes_body_deterministically() {
        assert_eq!(hex_sha256(b"hello"), hex_sha256(b"hello"));
        assert_ne!(hex_sha256(b"hello"), hex_sha256(b"world"));
    }
}
