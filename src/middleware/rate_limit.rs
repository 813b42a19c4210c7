//! Per-client fixed-window rate limiting
//!
//! One window counter per client key, all under a single map. The
//! check-and-increment runs inside the lock, so two concurrent requests
//! at the admission boundary can never both slip through.
//!
//! Window boundaries are not smoothed: a client can burst up to
//! `2 * max_requests` across a boundary. This is the accepted
//! approximation of fixed-window counting, not a bug.

use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::middleware::client_ip::ClientKey;
use crate::server::AppState;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Purge expired windows opportunistically once the map grows past this.
const PURGE_THRESHOLD: usize = 10_000;

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Reject { retry_after_secs: u64 },
}

struct RateWindow {
    window_start_ms: u64,
    count: u64,
}

/// Fixed-window request counter, shared across all requests.
pub struct RateLimiter {
    windows: Mutex<HashMap<ClientKey, RateWindow>>,
    window_ms: u64,
    max_requests: u64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window_ms: config.window_ms,
            max_requests: config.max_requests,
        }
    }

    /// Check and record one request from `key` at `now_ms`.
    ///
    /// An expired window is replaced, never incremented. The counter is
    /// not refunded if the client later disconnects.
    pub fn admit(&self, key: &ClientKey, now_ms: u64) -> Decision {
        let mut windows = self.windows.lock().unwrap();

        let window = windows.entry(key.clone()).or_insert(RateWindow {
            window_start_ms: now_ms,
            count: 0,
        });

        if now_ms.saturating_sub(window.window_start_ms) >= self.window_ms {
            window.window_start_ms = now_ms;
            window.count = 0;
        }
        window.count += 1;

        let decision = if window.count <= self.max_requests {
            Decision::Allow
        } else {
            let window_end_ms = window.window_start_ms + self.window_ms;
            Decision::Reject {
                retry_after_secs: window_end_ms.saturating_sub(now_ms).div_ceil(1000),
            }
        };

        if windows.len() > PURGE_THRESHOLD {
            let window_ms = self.window_ms;
            windows.retain(|_, w| now_ms.saturating_sub(w.window_start_ms) < window_ms);
        }

        decision
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Rate limiting middleware function
///
/// Rejects with 429 and `Retry-After` before the session guard or any
/// downstream logic runs; the audit layer outside this one still records
/// the rejected request.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request
        .extensions()
        .get::<ClientKey>()
        .cloned()
        .unwrap_or_else(|| ClientKey("unknown".to_string()));

    match state.rate_limiter.admit(&key, now_ms()) {
        Decision::Allow => next.run(request).await,
        Decision::Reject { retry_after_secs } => {
            metrics::counter!("gatehouse_rate_limit_rejected_total").increment(1);
            AppError::RateLimitExceeded { retry_after_secs }.into_response()
        }
    }
}
