//! Admission gates for the ingress pipeline
//!
//! Each gate is an axum middleware function; the orchestrator in
//! `server` composes them in a fixed order:
//! client key -> audit capture -> rate limit -> session -> CSRF.

pub mod audit;
pub mod client_ip;
pub mod csrf;
pub mod rate_limit;
pub mod session;

pub use audit::audit_middleware;
pub use client_ip::{client_key_middleware, ClientKey};
pub use csrf::{csrf_middleware, CsrfBodyToken};
pub use rate_limit::{rate_limit_middleware, Decision, RateLimiter};
pub use session::{session_middleware, SessionHandle};
