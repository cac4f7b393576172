pub mod config;
pub mod pool;

use crate::backend::{Backend, BackendError, IsolationLevel, SessionSettings};
use config::ConnectionConfig;
use pool::{ConnectionPool, PoolGuard, PoolStats};
use std::time::Duration;
use tracing::warn;

/// Hands out pooled connections already configured for gateway calls.
///
/// Every connection is switched to autocommit and read-committed isolation
/// before use; the returned guard releases it on every exit path.
pub struct ConnectionProvider<B: Backend> {
    pool: ConnectionPool<B>,
    settings: SessionSettings,
}

impl<B: Backend> ConnectionProvider<B> {
    pub fn new(pool: ConnectionPool<B>, statement_timeout: Duration) -> Self {
        Self {
            pool,
            settings: SessionSettings {
                autocommit: true,
                isolation: IsolationLevel::ReadCommitted,
                statement_timeout: Some(statement_timeout),
            },
        }
    }

    /// Acquire one connection. Pool exhaustion, handshake failures and
    /// session-setup failures are all reported as transient faults.
    pub async fn acquire(&self) -> Result<PoolGuard<B::Connection>, BackendError> {
        let mut guard = self.pool.get_connection().await?;

        if let Err(e) = guard.ensure_session(&self.settings).await {
            warn!(connection_id = guard.id(), error = %e, "session setup failed");
            guard.discard();
            return Err(BackendError::transient(format!(
                "session setup failed: {}",
                e.message()
            )));
        }

        Ok(guard)
    }

    pub fn session_settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn pool(&self) -> &ConnectionPool<B> {
        &self.pool
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        self.pool.config()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
