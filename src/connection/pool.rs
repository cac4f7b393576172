use super::config::ConnectionConfig;
use crate::backend::{Backend, BackendConnection, BackendError, SessionSettings};
use crate::core::{GatewayError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Poll interval while waiting for a connection to be returned.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(10);

type IdleQueue<C> = Arc<Mutex<VecDeque<PooledConnection<C>>>>;

/// Connection pool
///
/// Manages a bounded set of backend sessions. Acquisition waits up to
/// `connect_timeout` for a free slot; running out of time is reported as a
/// transient fault so the retry layer can try again later.
pub struct ConnectionPool<B: Backend> {
    /// Session factory
    backend: Arc<B>,
    /// Pool configuration
    config: ConnectionConfig,
    /// Idle connections
    available: IdleQueue<B::Connection>,
    /// Connections currently open, idle or checked out
    total_connections: Arc<AtomicUsize>,
    /// Next connection ID
    next_id: AtomicU64,
}

/// A connection owned by the pool
pub(crate) struct PooledConnection<C> {
    id: u64,
    connection: C,
    created_at: Instant,
    last_used: Instant,
    session: Option<SessionSettings>,
}

impl<C> PooledConnection<C> {
    fn new(id: u64, connection: C) -> Self {
        let now = Instant::now();
        Self {
            id,
            connection,
            created_at: now,
            last_used: now,
            session: None,
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|lifetime| self.created_at.elapsed() > lifetime)
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|timeout| self.last_used.elapsed() > timeout)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: Backend> ConnectionPool<B> {
    /// Create a pool and open `min_connections` sessions up front.
    pub async fn new(backend: B, config: ConnectionConfig) -> Result<Self> {
        config.validate().map_err(GatewayError::Config)?;

        let pool = Self {
            backend: Arc::new(backend),
            config,
            available: Arc::new(Mutex::new(VecDeque::new())),
            total_connections: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        };

        // Pre-create minimum connections
        pool.ensure_min_connections()
            .await
            .map_err(|e| GatewayError::Config(format!("failed to warm pool: {}", e)))?;

        Ok(pool)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Get a connection from the pool
    pub async fn get_connection(
        &self,
    ) -> std::result::Result<PoolGuard<B::Connection>, BackendError> {
        let start = Instant::now();

        loop {
            // Try to get an available connection
            if let Some(mut pooled) = self.try_get_available() {
                pooled.last_used = Instant::now();
                return Ok(self.guard(pooled));
            }

            // Try to create a new connection if under limit
            if let Some(pooled) = self.try_create_connection().await? {
                return Ok(self.guard(pooled));
            }

            // Check timeout
            if start.elapsed() >= self.config.connect_timeout {
                return Err(BackendError::transient(format!(
                    "connection pool timeout: no connections available within {}ms",
                    self.config.connect_timeout.as_millis()
                )));
            }

            // Wait a bit before retrying
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    fn guard(&self, pooled: PooledConnection<B::Connection>) -> PoolGuard<B::Connection> {
        PoolGuard {
            connection: Some(pooled),
            pool: Arc::clone(&self.available),
            total_connections: Arc::clone(&self.total_connections),
            discard: false,
        }
    }

    /// Pop a healthy idle connection, evicting stale ones on the way
    fn try_get_available(&self) -> Option<PooledConnection<B::Connection>> {
        let mut available = lock(&self.available);

        let before = available.len();
        available.retain(|pooled| {
            !(pooled.is_expired(self.config.max_lifetime)
                || pooled.is_idle_too_long(self.config.idle_timeout)
                || pooled.connection.is_broken())
        });
        let removed = before - available.len();

        if removed > 0 {
            self.total_connections.fetch_sub(removed, Ordering::SeqCst);
            debug!(removed, "evicted stale pooled connections");
        }

        available.pop_front()
    }

    /// Reserve a slot under the limit, then open a session for it
    async fn try_create_connection(
        &self,
    ) -> std::result::Result<Option<PooledConnection<B::Connection>>, BackendError> {
        let max = self.config.max_connections;
        let reserved = self
            .total_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                (total < max).then_some(total + 1)
            })
            .is_ok();

        if !reserved {
            return Ok(None);
        }

        match self.open().await {
            Ok(pooled) => Ok(Some(pooled)),
            Err(e) => {
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Handshake failures are always transient from the caller's view.
    async fn open(&self) -> std::result::Result<PooledConnection<B::Connection>, BackendError> {
        let handshake = tokio::time::timeout(self.config.connect_timeout, self.backend.connect());
        let connection = match handshake.await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                return Err(BackendError::transient(format!(
                    "connection handshake failed: {}",
                    e.message()
                )));
            }
            Err(_) => {
                return Err(BackendError::transient(format!(
                    "connection handshake timed out after {}ms",
                    self.config.connect_timeout.as_millis()
                )));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection::new(id, connection))
    }

    /// Ensure minimum number of connections
    async fn ensure_min_connections(&self) -> std::result::Result<(), BackendError> {
        while self.total_connections.load(Ordering::SeqCst) < self.config.min_connections {
            if let Some(pooled) = self.try_create_connection().await? {
                lock(&self.available).push_back(pooled);
            } else {
                break;
            }
        }

        Ok(())
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let available = lock(&self.available).len();
        let total = self.total_connections.load(Ordering::SeqCst);

        PoolStats {
            total_connections: total,
            available_connections: available,
            active_connections: total.saturating_sub(available),
            max_connections: self.config.max_connections,
        }
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} available, max {}",
            self.active_connections,
            self.total_connections,
            self.available_connections,
            self.max_connections
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to the pool when dropped, unless it was marked
/// for discard or the backend reports it broken.
pub struct PoolGuard<C: BackendConnection> {
    connection: Option<PooledConnection<C>>,
    pool: IdleQueue<C>,
    total_connections: Arc<AtomicUsize>,
    discard: bool,
}

impl<C: BackendConnection> PoolGuard<C> {
    fn pooled(&mut self) -> &mut PooledConnection<C> {
        self.connection
            .as_mut()
            .expect("Connection already returned to pool")
    }

    /// Get a reference to the connection
    pub fn connection(&mut self) -> &mut C {
        &mut self.pooled().connection
    }

    /// Pool-assigned connection ID
    pub fn id(&self) -> u64 {
        self.connection.as_ref().map_or(0, |pooled| pooled.id)
    }

    /// Apply session settings unless this connection already carries them.
    pub async fn ensure_session(
        &mut self,
        settings: &SessionSettings,
    ) -> std::result::Result<(), BackendError> {
        let pooled = self.pooled();
        if pooled.session.as_ref() == Some(settings) {
            return Ok(());
        }

        pooled.connection.prepare_session(settings).await?;
        pooled.session = Some(*settings);
        Ok(())
    }

    /// Close the connection instead of returning it to the pool.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl<C: BackendConnection> Drop for PoolGuard<C> {
    fn drop(&mut self) {
        let Some(mut pooled) = self.connection.take() else {
            return;
        };

        if self.discard || pooled.connection.is_broken() {
            debug!(connection_id = pooled.id, "dropping connection instead of pooling it");
            self.total_connections.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        pooled.last_used = Instant::now();
        match self.pool.lock() {
            Ok(mut pool) => pool.push_back(pooled),
            Err(_) => {
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("admin", "adminpass").min_connections(0)
    }

    #[tokio::test]
    async fn test_pool_creation() {
        let config = config().min_connections(2).max_connections(5);

        let pool = ConnectionPool::new(InMemoryBackend::new(), config).await.unwrap();
        let stats = pool.stats();

        assert_eq!(stats.total_connections, 2); // min_connections
        assert_eq!(stats.available_connections, 2);
    }

    #[tokio::test]
    async fn test_get_connection() {
        let pool = ConnectionPool::new(InMemoryBackend::new(), config().max_connections(5))
            .await
            .unwrap();
        let mut conn = pool.get_connection().await.unwrap();

        assert!(!conn.connection().is_broken());
        assert_eq!(pool.stats().active_connections, 1);
    }

    #[tokio::test]
    async fn test_connection_return_to_pool() {
        let config = config().min_connections(1).max_connections(5);
        let pool = ConnectionPool::new(InMemoryBackend::new(), config).await.unwrap();

        {
            let _conn = pool.get_connection().await.unwrap();
            let stats = pool.stats();
            assert_eq!(stats.active_connections, 1);
            assert_eq!(stats.available_connections, 0);
        } // Connection returned here

        let stats = pool.stats();
        assert_eq!(stats.available_connections, 1);
        assert_eq!(stats.total_connections, 1);
    }

    #[tokio::test]
    async fn test_discarded_connection_is_not_reused() {
        let backend = InMemoryBackend::new();
        let pool = ConnectionPool::new(backend.clone(), config()).await.unwrap();

        {
            let mut conn = pool.get_connection().await.unwrap();
            conn.discard();
        }

        assert_eq!(pool.stats().total_connections, 0);
        let _conn = pool.get_connection().await.unwrap();
        assert_eq!(backend.connections_opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_connections_limit_is_transient() {
        let config = config()
            .max_connections(2)
            .connect_timeout(Duration::from_millis(100));

        let pool = ConnectionPool::new(InMemoryBackend::new(), config).await.unwrap();

        let _conn1 = pool.get_connection().await.unwrap();
        let _conn2 = pool.get_connection().await.unwrap();

        // Third connection should timeout
        let err = pool.get_connection().await.err().unwrap();
        assert!(err.is_transient());
        assert!(err.message().contains("pool timeout"));
    }

    #[tokio::test]
    async fn test_handshake_failure_is_transient_and_releases_slot() {
        let backend = InMemoryBackend::new();
        backend.fail_next_connects(1, BackendError::fatal("password authentication failed"));

        let pool = ConnectionPool::new(backend, config().max_connections(1)).await.unwrap();

        let err = pool.get_connection().await.err().unwrap();
        assert!(err.is_transient());
        assert_eq!(pool.stats().total_connections, 0);

        assert!(pool.get_connection().await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_session_applies_once() {
        let pool = ConnectionPool::new(InMemoryBackend::new(), config()).await.unwrap();
        let settings = SessionSettings::default();

        let mut conn = pool.get_connection().await.unwrap();
        conn.ensure_session(&settings).await.unwrap();
        conn.ensure_session(&settings).await.unwrap();

        assert_eq!(conn.pooled().session, Some(settings));
    }

    #[tokio::test]
    async fn test_pool_stats() {
        let config = config().min_connections(2).max_connections(10);

        let pool = ConnectionPool::new(InMemoryBackend::new(), config).await.unwrap();
        let stats = pool.stats();

        assert_eq!(stats.max_connections, 10);
        assert_eq!(stats.total_connections, 2);
        assert_eq!(
            stats.to_string(),
            "Pool Stats: 0/2 active, 2 available, max 10"
        );
    }
}
