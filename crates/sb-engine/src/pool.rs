//! # Connection Pool Manager
//!
//! A `deadpool` managed pool over any storage [`Connector`]. `acquire` hands
//! out an idle connection or dials a fresh one; the returned
//! [`PooledConnection`] puts it back when dropped, so every exit path
//! (success, error, unwind) releases it.
//!
//! Idle handles above `max_idle`, handles that report `is_reusable() == false`
//! and handles unused for longer than `idle_timeout` are dropped, and later
//! acquires dial again.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{self, Metrics, Object, PoolError, RecycleError, RecycleResult};
use deadpool::Runtime;
use sb_core::{AppError, Connection, Connector, Result};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Bound on dialing a new connection, and on waiting for a free slot.
    pub connect_timeout: Duration,
    /// Handles not checked out for longer than this are redialed.
    pub idle_timeout: Option<Duration>,
    /// Idle handles kept around; extras are dropped on release.
    pub max_idle: usize,
    /// Connections open at once, idle or in use.
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            idle_timeout: Some(Duration::from_secs(300)),
            max_idle: 16,
            max_size: 64,
        }
    }
}

/// Point-in-time pool bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Dials and vets connections for the managed pool.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
    counters: Arc<Counters>,
}

impl<C: Connector> managed::Manager for ConnectionManager<C> {
    type Type = C::Connection;
    type Error = AppError;

    async fn create(&self) -> Result<C::Connection> {
        let backend = self.connector.backend();
        let timeout = self.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(Ok(conn)) => {
                Counters::bump(&self.counters.created, 1);
                tracing::debug!(backend, "dialed new connection");
                Ok(conn)
            }
            Ok(Err(err)) => {
                Counters::bump(&self.counters.failed, 1);
                tracing::warn!(backend, error = %err, "failed to connect");
                Err(match err {
                    AppError::Connection(_) => err,
                    other => AppError::Connection(other.to_string()),
                })
            }
            Err(_) => {
                Counters::bump(&self.counters.failed, 1);
                tracing::warn!(backend, ?timeout, "connect timed out");
                Err(AppError::Connection(format!("connect timed out after {timeout:?}")))
            }
        }
    }

    async fn recycle(&self, conn: &mut C::Connection, metrics: &Metrics) -> RecycleResult<AppError> {
        if !conn.is_reusable() {
            Counters::bump(&self.counters.discarded, 1);
            return Err(RecycleError::Message("connection is not reusable".into()));
        }
        if self
            .idle_timeout
            .is_some_and(|limit| metrics.last_used() >= limit)
        {
            Counters::bump(&self.counters.discarded, 1);
            tracing::debug!(backend = self.connector.backend(), "dropping expired idle connection");
            return Err(RecycleError::Message("idle timeout elapsed".into()));
        }
        Counters::bump(&self.counters.reused, 1);
        Ok(())
    }
}

/// Cheaply cloneable handle to one shared pool.
pub struct Pool<C: Connector> {
    inner: managed::Pool<ConnectionManager<C>>,
    counters: Arc<Counters>,
    max_idle: usize,
    backend: &'static str,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            counters: Arc::clone(&self.counters),
            max_idle: self.max_idle,
            backend: self.backend,
        }
    }
}

impl<C: Connector> Pool<C> {
    /// Lazy pool: nothing is dialed until the first `acquire`.
    pub fn new(connector: C, config: PoolConfig) -> Result<Self> {
        let counters = Arc::new(Counters::default());
        let backend = connector.backend();
        let manager = ConnectionManager {
            connector,
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
            counters: Arc::clone(&counters),
        };
        let inner = managed::Pool::builder(manager)
            .max_size(config.max_size)
            .wait_timeout(Some(config.connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|err| AppError::Connection(format!("invalid pool configuration: {err}")))?;

        Ok(Self {
            inner,
            counters,
            max_idle: config.max_idle,
            backend,
        })
    }

    /// Eager pool: dials one connection now so a bad backend fails at startup.
    pub async fn connect(connector: C, config: PoolConfig) -> Result<Self> {
        let pool = Self::new(connector, config)?;
        pool.acquire().await?.release();
        tracing::info!(backend = pool.backend(), "storage pool ready");
        Ok(pool)
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub async fn acquire(&self) -> Result<PooledConnection<C>> {
        let object = self.inner.get().await.map_err(|err| match err {
            PoolError::Backend(err) => err,
            other => {
                Counters::bump(&self.counters.failed, 1);
                tracing::warn!(backend = self.backend, error = %other, "no connection available");
                AppError::Connection(other.to_string())
            }
        })?;
        Ok(PooledConnection {
            object: Some(object),
            pool: self.clone(),
            discard: false,
        })
    }

    /// Drops every idle connection, e.g. under memory pressure.
    pub fn reclaim_idle(&self) -> usize {
        let before = self.inner.status().available;
        let _ = self.inner.retain(|_, _| false);
        let reclaimed = before.saturating_sub(self.inner.status().available);
        Counters::bump(&self.counters.discarded, reclaimed as u64);
        reclaimed
    }

    pub fn stats(&self) -> PoolStats {
        let status = self.inner.status();
        PoolStats {
            idle: status.available,
            in_use: status.size.saturating_sub(status.available),
            created: self.counters.created.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive, scoped use of one pooled connection.
pub struct PooledConnection<C: Connector> {
    object: Option<Object<ConnectionManager<C>>>,
    pool: Pool<C>,
    discard: bool,
}

impl<C: Connector> PooledConnection<C> {
    /// Returns the connection to the idle set now.
    pub fn release(self) {
        drop(self);
    }

    /// Drops the connection instead of pooling it.
    pub fn discard(mut self) {
        self.discard = true;
    }

    /// Flags the connection so it is dropped, not pooled, on release.
    pub fn mark_broken(&mut self) {
        self.discard = true;
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` empties the slot.
        self.object.as_deref().expect("pooled connection used after release")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(object) = self.object.take() else {
            return;
        };
        let keep = !self.discard
            && object.is_reusable()
            && self.pool.inner.status().available < self.pool.max_idle;
        if !keep {
            Counters::bump(&self.pool.counters.discarded, 1);
            tracing::debug!(backend = self.pool.backend, "discarding connection");
            drop(Object::take(object));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_db_memory::{FaultPoint, MemoryConnector, MemoryStore};

    fn pool(store: &MemoryStore, config: PoolConfig) -> Pool<MemoryConnector> {
        Pool::new(store.connector(), config).unwrap()
    }

    #[tokio::test]
    async fn test_release_returns_connection_for_reuse() {
        let store = MemoryStore::new();
        let pool = pool(&store, PoolConfig::default());

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().in_use, 1);
        conn.release();

        let _again = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.in_use, 1);
        assert_eq!(store.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_failed_acquire_then_retry_keeps_bookkeeping() {
        let store = MemoryStore::new();
        let pool = pool(&store, PoolConfig::default());
        store.inject_fault(FaultPoint::Connect, 1);

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, AppError::Connection(_)));
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(pool.stats().failed, 1);

        let conn = pool.acquire().await.unwrap();
        drop(conn);
        let stats = pool.stats();
        assert_eq!((stats.in_use, stats.idle, stats.created), (0, 1, 1));
        assert_eq!(store.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_connect_timeout_is_a_connection_error() {
        let store = MemoryStore::new();
        store.set_latency(Duration::from_millis(200));
        let pool = pool(
            &store,
            PoolConfig {
                connect_timeout: Duration::from_millis(10),
                ..PoolConfig::default()
            },
        );
        let err = pool.acquire().await.err().unwrap();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
        assert_eq!(pool.stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out_waiting() {
        let store = MemoryStore::new();
        let pool = pool(
            &store,
            PoolConfig {
                connect_timeout: Duration::from_millis(20),
                max_size: 1,
                ..PoolConfig::default()
            },
        );
        let held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, AppError::Connection(_)));
        assert_eq!(pool.stats().in_use, 1);

        held.release();
        pool.acquire().await.unwrap().release();
        assert_eq!(pool.stats().created, 1);
    }

    #[tokio::test]
    async fn test_eager_pool_fails_at_startup() {
        let store = MemoryStore::new();
        store.inject_fault(FaultPoint::Connect, 1);
        let result = Pool::connect(store.connector(), PoolConfig::default()).await;
        assert!(matches!(result, Err(AppError::Connection(_))));

        let pool = Pool::connect(store.connector(), PoolConfig::default()).await.unwrap();
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_discard_drops_backend_connection() {
        let store = MemoryStore::new();
        let pool = pool(&store, PoolConfig::default());
        pool.acquire().await.unwrap().discard();
        let stats = pool.stats();
        assert_eq!((stats.idle, stats.in_use, stats.discarded), (0, 0, 1));
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_idle_overflow_is_dropped() {
        let store = MemoryStore::new();
        let pool = pool(
            &store,
            PoolConfig {
                max_idle: 1,
                ..PoolConfig::default()
            },
        );
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        a.release();
        b.release();
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(store.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_expired_and_reclaimed_handles_are_redialed() {
        let store = MemoryStore::new();
        let pool = pool(
            &store,
            PoolConfig {
                idle_timeout: Some(Duration::from_millis(10)),
                ..PoolConfig::default()
            },
        );
        pool.acquire().await.unwrap().release();
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.acquire().await.unwrap().release();
        assert_eq!(pool.stats().created, 2);

        assert_eq!(pool.reclaim_idle(), 1);
        assert_eq!(store.open_connections(), 0);
        pool.acquire().await.unwrap().release();
        assert_eq!(pool.stats().created, 3);
    }

    #[tokio::test]
    async fn test_panicking_holder_still_releases() {
        let store = MemoryStore::new();
        let pool = pool(&store, PoolConfig::default());
        let worker = pool.clone();
        let joined = tokio::spawn(async move {
            let _conn = worker.acquire().await.unwrap();
            panic!("operation blew up");
        })
        .await;
        assert!(joined.unwrap_err().is_panic());
        let stats = pool.stats();
        assert_eq!((stats.in_use, stats.idle), (0, 1));
    }
}
