//! Storage lifecycle supervision
//!
//! Owns the connection state to the backing store and exposes readiness.
//! The pipeline gates never consult storage; only process liveness and
//! the `/ready` probe depend on it. A failed connection is fatal: there
//! is no automatic reconnect (retries are an extension point).

use crate::config::DatabaseConfig;
use crate::error::{AppError, Result};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Connection state machine:
/// `Disconnected -> Connecting -> Connected`, with
/// `Connecting | Connected -> Failed` on any driver-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Read side of the supervisor's state, shared with the router and the
/// shutdown path.
#[derive(Clone)]
pub struct StorageHandle {
    state: watch::Receiver<ConnectionState>,
}

impl StorageHandle {
    /// Readiness signal consumed by `/ready`.
    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    pub fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves once the supervisor reports a mid-life failure.
    pub async fn wait_failed(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == ConnectionState::Failed)
            .await;
    }

    /// Handle pinned to a fixed state, for tests and disabled setups.
    pub fn fixed(state: ConnectionState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self { state: rx }
    }
}

/// Supervises the database connection for the life of the process.
pub struct StorageSupervisor {
    state: watch::Sender<ConnectionState>,
}

impl StorageSupervisor {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { state }
    }

    pub fn handle(&self) -> StorageHandle {
        StorageHandle {
            state: self.state.subscribe(),
        }
    }

    /// Perform the one startup connection attempt.
    ///
    /// Failure leaves the state machine in `Failed` and returns an error
    /// the caller is expected to treat as fatal.
    pub async fn connect(&self, config: &DatabaseConfig) -> Result<MySqlPool> {
        self.state.send_replace(ConnectionState::Connecting);

        match MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
        {
            Ok(pool) => {
                self.state.send_replace(ConnectionState::Connected);
                info!("database connected successfully");
                Ok(pool)
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Failed);
                error!(error = %e, "database connection failed");
                Err(AppError::StorageConnection(e.to_string()))
            }
        }
    }

    /// Watch an established connection; any driver error flips the state
    /// to `Failed` and the task exits.
    pub fn spawn_monitor(&self, pool: MySqlPool, interval: Duration) -> JoinHandle<()> {
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; the connection was just checked.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
                    error!(error = %e, "database connection lost");
                    state.send_replace(ConnectionState::Failed);
                    return;
                }
            }
        })
    }
}

impl Default for StorageSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_disconnected() {
        let supervisor = StorageSupervisor::new();
        assert_eq!(supervisor.handle().current(), ConnectionState::Disconnected);
        assert!(!supervisor.handle().is_ready());
    }

    #[test]
    fn test_fixed_handle() {
        let handle = StorageHandle::fixed(ConnectionState::Connected);
        assert!(handle.is_ready());

        let handle = StorageHandle::fixed(ConnectionState::Failed);
        assert!(!handle.is_ready());
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_fatal_and_observable() {
        let supervisor = StorageSupervisor::new();
        let handle = supervisor.handle();

        // Nothing listens on port 1; the driver fails fast.
        let config = DatabaseConfig {
            url: "mysql://root@127.0.0.1:1/gatehouse".to_string(),
            max_connections: 1,
            min_connections: 1,
        };

        let result = supervisor.connect(&config).await;
        assert!(matches!(result, Err(AppError::StorageConnection(_))));
        assert_eq!(handle.current(), ConnectionState::Failed);
        assert!(!handle.is_ready());
    }

    #[tokio::test]
    async fn test_wait_failed_resolves_on_failure() {
        let supervisor = StorageSupervisor::new();
        let mut handle = supervisor.handle();

        supervisor.state.send_replace(ConnectionState::Connected);
        let waiter = tokio::spawn(async move {
            handle.wait_failed().await;
        });

        supervisor.state.send_replace(ConnectionState::Failed);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_failed should resolve")
            .unwrap();
    }
}
