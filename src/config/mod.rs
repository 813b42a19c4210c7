//! Configuration management for Gatehouse

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server host
    pub http_host: String,
    /// HTTP server port
    pub http_port: u16,
    /// Whether a trusted reverse proxy sits in front of the service.
    /// When true the client key is taken from forwarding headers.
    pub trust_proxy: bool,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Session configuration
    pub session: SessionConfig,
    /// Audit logging configuration
    pub audit: AuditConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Fixed window duration in milliseconds
    pub window_ms: u64,
    /// Maximum requests admitted per window per client
    pub max_requests: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 50,
        }
    }
}

/// Session cookie configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether the session cookie carries the Secure attribute
    pub cookie_secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_secure: true,
        }
    }
}

/// Audit log rotation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Daily,
    Hourly,
}

impl Rotation {
    /// Partition stamp for the given instant, used in log file names.
    pub fn partition(&self, at: chrono::DateTime<chrono::Utc>) -> String {
        match self {
            Rotation::Daily => at.format("%Y-%m-%d").to_string(),
            Rotation::Hourly => at.format("%Y-%m-%d-%H").to_string(),
        }
    }
}

impl FromStr for Rotation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Rotation::Daily),
            "hourly" => Ok(Rotation::Hourly),
            other => bail!("invalid AUDIT_ROTATION: {other} (expected daily or hourly)"),
        }
    }
}

/// Audit logging configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Directory audit log files are written to
    pub dir: PathBuf,
    /// File name prefix, producing `<prefix>-<partition>.log`
    pub prefix: String,
    /// Time partition granularity
    pub rotation: Rotation,
    /// Rotate the active file early once it exceeds this size
    pub max_size_bytes: u64,
    /// Maximum number of rotated archives kept on disk
    pub max_files: usize,
    /// Capacity of the in-flight record queue
    pub queue_capacity: usize,
    /// Field names whose values are redacted before a record is persisted
    pub sensitive_fields: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./logs"),
            prefix: "access".to_string(),
            rotation: Rotation::Hourly,
            max_size_bytes: 20 * 1024 * 1024,
            max_files: 24,
            queue_capacity: 1024,
            sensitive_fields: default_sensitive_fields(),
        }
    }
}

fn default_sensitive_fields() -> Vec<String> {
    ["backupkey", "password", "pin", "mPass", "keyObject"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|s| s.to_lowercase() == "true" || s == "1")
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid HTTP_PORT")?,
            trust_proxy: env_bool("TRUST_PROXY", false),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
            },
            rate_limit: RateLimitConfig {
                window_ms: env::var("RATE_LIMIT_WINDOW_MS")
                    .unwrap_or_else(|_| "60000".to_string())
                    .parse()
                    .unwrap_or(60_000),
                max_requests: env::var("RATE_LIMIT_MAX_REQUESTS")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
            session: SessionConfig {
                cookie_secure: env_bool("SESSION_COOKIE_SECURE", true),
            },
            audit: AuditConfig {
                dir: PathBuf::from(env::var("AUDIT_LOG_DIR").unwrap_or_else(|_| "./logs".to_string())),
                prefix: env::var("AUDIT_LOG_PREFIX").unwrap_or_else(|_| "access".to_string()),
                rotation: env::var("AUDIT_ROTATION")
                    .unwrap_or_else(|_| "hourly".to_string())
                    .parse()
                    .context("Invalid AUDIT_ROTATION")?,
                max_size_bytes: env::var("AUDIT_MAX_SIZE_BYTES")
                    .unwrap_or_else(|_| (20 * 1024 * 1024).to_string())
                    .parse()
                    .unwrap_or(20 * 1024 * 1024),
                max_files: env::var("AUDIT_MAX_FILES")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .unwrap_or(24),
                queue_capacity: env::var("AUDIT_QUEUE_CAPACITY")
                    .unwrap_or_else(|_| "1024".to_string())
                    .parse()
                    .unwrap_or(1024),
                sensitive_fields: env::var("AUDIT_SENSITIVE_FIELDS")
                    .map(|s| s.split(',').map(|f| f.trim().to_string()).collect())
                    .unwrap_or_else(|_| default_sensitive_fields()),
            },
        })
    }

    /// Get HTTP server address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}
