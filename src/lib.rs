//! Gatehouse - request admission and security pipeline
//!
//! Decides, for every inbound request, whether it may reach the business
//! routes, under what session context, and with what audit trail:
//! client key derivation, fixed-window rate limiting, session-bound CSRF
//! validation, redacting audit capture and storage lifecycle
//! supervision, composed in a fixed order.

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod middleware;
pub mod server;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
