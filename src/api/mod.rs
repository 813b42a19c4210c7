//! HTTP endpoints
//!
//! Health probes plus a minimal session-backed resource standing in for
//! the downstream business routes the pipeline protects.

pub mod health;
pub mod session;
