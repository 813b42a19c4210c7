//! Common test utilities

use axum::http::header::SET_COOKIE;
use axum::response::Response;
use axum::Router;
use gatehouse::audit::AuditLogger;
use gatehouse::config::{AuditConfig, Config, DatabaseConfig, RateLimitConfig, SessionConfig};
use gatehouse::middleware::RateLimiter;
use gatehouse::server::{build_router, AppState};
use gatehouse::session::InMemorySessionStore;
use gatehouse::storage::{ConnectionState, StorageHandle};
use std::path::PathBuf;
use std::sync::Arc;

/// Fresh audit directory per test run.
pub fn temp_audit_dir() -> PathBuf {
    std::env::temp_dir().join(format!(
        "gatehouse-it-{}",
        hex_suffix()
    ))
}

fn hex_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("{}-{nanos:x}", std::process::id())
}

pub fn test_config(audit_dir: PathBuf, max_requests: u64) -> Config {
    Config {
        http_host: "127.0.0.1".to_string(),
        http_port: 0,
        trust_proxy: false,
        database: DatabaseConfig {
            url: "mysql://localhost/test".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        rate_limit: RateLimitConfig {
            window_ms: 60_000,
            max_requests,
        },
        session: SessionConfig {
            cookie_secure: true,
        },
        audit: AuditConfig {
            dir: audit_dir,
            ..AuditConfig::default()
        },
    }
}

/// Build an app with a ready storage handle and a fresh session store.
/// Returns the store so tests can observe persistence behavior.
pub fn test_app(config: Config) -> (Router, Arc<InMemorySessionStore>) {
    let sessions = Arc::new(InMemorySessionStore::new());
    let (audit, _task) = AuditLogger::spawn(&config.audit);
    let state = AppState {
        rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
        sessions: sessions.clone(),
        audit,
        storage: StorageHandle::fixed(ConnectionState::Connected),
        config: Arc::new(config),
    };
    (build_router(state), sessions)
}

/// Extract the value of a named cookie from the response's Set-Cookie
/// headers.
pub fn cookie_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let (pair, _attrs) = cookie.split_once(';').unwrap_or((cookie, ""));
            let (key, value) = pair.split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
}

pub async fn body_json(response: Response) -> serde_json::Value {
    use http_body_util::BodyExt;
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
