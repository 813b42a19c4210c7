//! Request/response audit capture
//!
//! Sits outside every admission gate so rejected requests are recorded
//! too. Buffers both bodies (bounded), builds one `AuditRecord` per
//! request lifecycle and enqueues it fire-and-forget; the response is
//! never delayed or failed by audit persistence.

use crate::audit::AuditRecord;
use crate::middleware::client_ip::ClientKey;
use crate::middleware::csrf::CsrfBodyToken;
use crate::server::AppState;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

/// Capture cap, matching the ingress payload limit in front of the
/// pipeline.
const BODY_CAPTURE_LIMIT: usize = 1024 * 1024;

pub async fn audit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let client_key = request
        .extensions()
        .get::<ClientKey>()
        .map(|key| key.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let (parts, body) = request.into_parts();
    let request_bytes = match axum::body::to_bytes(body, BODY_CAPTURE_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            let response = StatusCode::PAYLOAD_TOO_LARGE.into_response();
            state.audit.record(AuditRecord {
                timestamp: Utc::now(),
                method,
                path,
                client_key,
                request_body: serde_json::Value::Null,
                response_body: serde_json::Value::Null,
                status: response.status().as_u16(),
            });
            return response;
        }
    };
    let mut request = Request::from_parts(parts, Body::from(request_bytes.clone()));

    // This layer already owns the buffered body, so it lifts the CSRF
    // body field out here; the guard downstream stays non-suspending.
    let request_body = parse_body(&request_bytes);
    if let Some(token) = request_body.get("_csrf").and_then(|v| v.as_str()) {
        request
            .extensions_mut()
            .insert(CsrfBodyToken(token.to_owned()));
    }

    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let response_bytes = axum::body::to_bytes(body, BODY_CAPTURE_LIMIT)
        .await
        .unwrap_or_else(|_| Bytes::new());

    state.audit.record(AuditRecord {
        timestamp: Utc::now(),
        method,
        path,
        client_key,
        request_body,
        response_body: parse_body(&response_bytes),
        status: parts.status.as_u16(),
    });

    Response::from_parts(parts, Body::from(response_bytes))
}

/// JSON bodies are captured structurally so redaction can traverse them;
/// anything else is recorded as an opaque string.
fn parse_body(bytes: &Bytes) -> serde_json::Value {
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
