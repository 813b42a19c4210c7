//! Audit logging with sensitive-field redaction
//!
//! Every request/response pair becomes one `AuditRecord`. Records are
//! redacted before they leave the request path, then handed to a
//! background writer over a bounded queue: the critical path never waits
//! on, or fails because of, log persistence.

mod writer;

pub use writer::PartitionedWriter;

use crate::config::AuditConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Marker substituted for redacted values
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// One audit record per request lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub client_key: String,
    pub request_body: serde_json::Value,
    pub response_body: serde_json::Value,
    pub status: u16,
}

/// Replace the value of every denylisted key with the redaction marker,
/// at any nesting depth, in objects and arrays alike. Key matching is
/// case-sensitive.
pub fn redact(value: &mut serde_json::Value, denylist: &HashSet<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if denylist.contains(key) {
                    *entry = serde_json::Value::String(REDACTION_MARKER.to_string());
                } else {
                    redact(entry, denylist);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                redact(item, denylist);
            }
        }
        _ => {}
    }
}

/// Cheaply clonable handle used by the request path to enqueue records.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditRecord>,
    denylist: Arc<HashSet<String>>,
}

impl AuditHandle {
    /// Redact and enqueue a record. Fire-and-forget: a full queue drops
    /// the new record (drop-newest) and reports the drop operationally.
    pub fn record(&self, mut record: AuditRecord) {
        redact(&mut record.request_body, &self.denylist);
        redact(&mut record.response_body, &self.denylist);

        if self.tx.try_send(record).is_err() {
            metrics::counter!("gatehouse_audit_dropped_total").increment(1);
            tracing::warn!("audit queue full, dropping record");
        }
    }
}

/// Background audit writer.
pub struct AuditLogger;

impl AuditLogger {
    /// Spawn the writer task and return the enqueue handle.
    ///
    /// Write failures are reported via tracing and never propagate to
    /// request handling.
    pub fn spawn(config: &AuditConfig) -> (AuditHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditRecord>(config.queue_capacity);
        let denylist: Arc<HashSet<String>> =
            Arc::new(config.sensitive_fields.iter().cloned().collect());
        let mut writer = PartitionedWriter::new(config);

        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let line = match serde_json::to_string(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize audit record");
                        continue;
                    }
                };
                if let Err(e) = writer.write_line(&line) {
                    metrics::counter!("gatehouse_audit_write_errors_total").increment(1);
                    tracing::error!(error = %e, "audit write failed");
                }
            }
        });

        (AuditHandle { tx, denylist }, task)
    }
}
