//! Server initialization and pipeline orchestration
//!
//! `build_router` is the single place the admission order is written
//! down; integration tests pin the short-circuit behavior of that order.

use crate::api;
use crate::audit::{AuditHandle, AuditLogger};
use crate::config::Config;
use crate::middleware::{
    audit_middleware, client_key_middleware, csrf_middleware, rate_limit_middleware,
    session_middleware, RateLimiter,
};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::storage::{StorageHandle, StorageSupervisor};
use anyhow::Result;
use axum::{middleware, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

const STORAGE_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Application state shared across handlers and gates
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rate_limiter: Arc<RateLimiter>,
    pub sessions: Arc<dyn SessionStore>,
    pub audit: AuditHandle,
    pub storage: StorageHandle,
}

/// Build the HTTP router.
///
/// Gate order per request (outermost first):
/// client key -> audit capture -> rate limit -> session -> CSRF ->
/// downstream routes. The first failing gate short-circuits; the audit
/// layer sits outside the gates so rejections are recorded too. Health
/// probes bypass the admission chain entirely.
pub fn build_router(state: AppState) -> Router {
    // Layers apply bottom-up: the last layer added runs first.
    let admitted = Router::new()
        .route("/api/v1/session/csrf", get(api::session::csrf_token))
        .route(
            "/api/v1/session/me",
            get(api::session::me).post(api::session::update),
        )
        .layer(middleware::from_fn(csrf_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            audit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            client_key_middleware,
        ));

    Router::new()
        .route("/health", get(api::health::health))
        .route("/ready", get(api::health::ready))
        .merge(admitted)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the server
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    // Storage comes up first; a failed initial connect aborts startup
    // before the listener binds.
    let supervisor = StorageSupervisor::new();
    let mut storage = supervisor.handle();
    let pool = supervisor.connect(&config.database).await?;
    let monitor = supervisor.spawn_monitor(pool, STORAGE_PING_INTERVAL);

    let (audit, _audit_task) = AuditLogger::spawn(&config.audit);

    let state = AppState {
        rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
        sessions: Arc::new(InMemorySessionStore::new()),
        audit,
        storage: storage.clone(),
        config: config.clone(),
    };

    let app = build_router(state);
    let listener = TcpListener::bind(config.http_addr()).await?;
    info!("listening on {}", config.http_addr());

    tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            result?;
        }
        // A mid-life storage failure is fatal; no reconnect loop.
        _ = storage.wait_failed() => {
            monitor.abort();
            anyhow::bail!("storage connection failed, shutting down");
        }
    }

    Ok(())
}
