//! Session-backed demo resource
//!
//! Stands in for the downstream business handlers: reads and mutates the
//! resolved session the pipeline hands it.

use crate::middleware::SessionHandle;
use axum::{response::IntoResponse, Extension, Json};
use chrono::Utc;
use serde_json::{json, Value};

/// Hand the client its CSRF token.
///
/// Issuing the token writes into the session, which establishes it: the
/// session middleware persists it and sets the cookies on the way out.
pub async fn csrf_token(Extension(session): Extension<SessionHandle>) -> impl IntoResponse {
    session.insert("csrf_issued_at", json!(Utc::now().to_rfc3339()));
    Json(json!({ "csrf_token": session.csrf_token() }))
}

/// Read the current session data. Never writes, so a fresh session is
/// not persisted by this call.
pub async fn me(Extension(session): Extension<SessionHandle>) -> impl IntoResponse {
    Json(Value::Object(session.data()))
}

/// Merge the request body into the session data.
pub async fn update(
    Extension(session): Extension<SessionHandle>,
    Json(body): Json<serde_json::Map<String, Value>>,
) -> impl IntoResponse {
    for (key, value) in body {
        session.insert(&key, value);
    }
    Json(Value::Object(session.data()))
}
