//! Registry of connection pools, one per [`PoolKey`].
//!
//! Pools are created lazily on first acquire and removed by a background
//! reaper once they have been unused for the pool idle timeout.
//!
//! # Concurrency
//!
//! - Creation is double-checked under the write lock, so concurrent first
//!   requests for one key share a single pool.
//! - A lookup touches the pool while holding the read lock, and the reaper
//!   re-checks `last_used` under the write lock, so a pool handed out is not
//!   reaped before its caller acquires. A caller that still lands on a closed
//!   pool retries once on a fresh one.
//! - No lock is held across an await on a pool operation: pools are cloned
//!   out of the map first.
//! - The reaper holds only a `Weak` reference and exits once the manager is
//!   dropped.

use crate::config::PoolOptions;
use crate::db::adapter::EngineAdapter;
use crate::db::pool::{ConnectionPool, PooledConnection};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, PoolKey, PoolStats};
use crate::secret::SecretResolver;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock as TokioRwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct ConnectionPoolManager {
    options: PoolOptions,
    connect_timeout: Duration,
    secrets: Arc<dyn SecretResolver>,
    pools: TokioRwLock<HashMap<PoolKey, Arc<ConnectionPool>>>,
    /// Reaper task handle. std Mutex so `close_all` can take it without awaiting.
    cleanup_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPoolManager {
    /// Create a manager and start its reaper. Must be called inside a tokio runtime.
    pub fn new(
        options: PoolOptions,
        connect_timeout: Duration,
        secrets: Arc<dyn SecretResolver>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            options,
            connect_timeout,
            secrets,
            pools: TokioRwLock::new(HashMap::new()),
            cleanup_handle: std::sync::Mutex::new(None),
        });

        let weak_manager = Arc::downgrade(&manager);
        let interval = manager.options.cleanup_interval_or_default();
        let handle = tokio::spawn(async move {
            Self::cleanup_task(weak_manager, interval).await;
        });
        *manager
            .cleanup_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);

        manager
    }

    /// Borrow a handle from the pool for `profile`, creating the pool on first use.
    pub async fn acquire(
        &self,
        profile: &ConnectionProfile,
        adapter: Arc<dyn EngineAdapter>,
    ) -> DbResult<PooledConnection> {
        let pool = self.pool_for(profile, Arc::clone(&adapter)).await;
        match pool.acquire().await {
            Err(e) if pool.is_closed() => {
                debug!(pool = %pool, error = %e, "Pool closed while acquiring, retrying");
                self.pool_for(profile, adapter).await.acquire().await
            }
            other => other,
        }
    }

    /// The live pool for `profile`, created if missing or closed.
    pub async fn pool_for(
        &self,
        profile: &ConnectionProfile,
        adapter: Arc<dyn EngineAdapter>,
    ) -> Arc<ConnectionPool> {
        let key = profile.pool_key();
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(&key).filter(|p| !p.is_closed()) {
                pool.touch();
                return Arc::clone(pool);
            }
        }

        let mut pools = self.pools.write().await;
        // Double-check after acquiring write lock
        if let Some(pool) = pools.get(&key).filter(|p| !p.is_closed()) {
            pool.touch();
            return Arc::clone(pool);
        }
        let pool = ConnectionPool::new(
            profile.clone(),
            adapter,
            Arc::clone(&self.secrets),
            self.options.clone(),
            self.connect_timeout,
        );
        info!(
            pool = %pool,
            max_connections = self.options.max_connections_or_default(),
            "Created connection pool"
        );
        pools.insert(key, Arc::clone(&pool));
        pool
    }

    /// Open, ping and close one handle for `profile` without taking a pool
    /// slot. An idle pooled handle is pinged instead when one is free.
    pub async fn check_reachable(
        &self,
        profile: &ConnectionProfile,
        adapter: Arc<dyn EngineAdapter>,
    ) -> DbResult<()> {
        let existing = self.pools.read().await.get(&profile.pool_key()).cloned();
        if let Some(pool) = existing.filter(|p| !p.is_closed()) {
            if let Some(mut conn) = pool.try_acquire_idle().await {
                match tokio::time::timeout(self.connect_timeout, conn.ping()).await {
                    Ok(Ok(())) => return Ok(()),
                    Ok(Err(e)) => debug!(pool = %pool, error = %e, "Idle connection failed ping"),
                    Err(_) => conn.mark_broken(),
                }
            }
        }

        let secret = self.secrets.resolve(profile.secret_ref()).await?;
        let mut conn = adapter
            .open(profile, &secret, self.connect_timeout)
            .await?;
        let pinged = match tokio::time::timeout(self.connect_timeout, conn.ping()).await {
            Ok(result) => result,
            Err(_) => Err(DbError::connect_failed(
                format!(
                    "Server did not answer a ping within {}ms",
                    self.connect_timeout.as_millis()
                ),
                "Check that the server is up and not overloaded",
            )),
        };
        if tokio::time::timeout(self.connect_timeout, conn.close())
            .await
            .is_err()
        {
            warn!(engine = %profile.engine(), "Close after connection test did not finish in time");
        }
        pinged
    }

    /// Snapshot of every pool, ordered by fingerprint.
    pub async fn stats(&self) -> Vec<PoolStats> {
        let pools: Vec<_> = self.pools.read().await.values().cloned().collect();
        let mut stats: Vec<_> = pools.iter().map(|p| p.stats()).collect();
        stats.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        stats
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// One reaper pass: close expired idle handles, then drop pools unused
    /// for longer than the pool idle timeout.
    pub async fn reap(&self) {
        let pool_idle_timeout = self.options.pool_idle_timeout_or_default();
        let pools: Vec<_> = self.pools.read().await.values().cloned().collect();

        let now = Instant::now();
        let mut candidates = Vec::new();
        for pool in pools {
            pool.reap_idle().await;
            if pool.in_use() == 0
                && now.saturating_duration_since(pool.last_used()) >= pool_idle_timeout
            {
                candidates.push(pool.key().clone());
            }
        }

        for key in candidates {
            let removed = {
                let mut pools = self.pools.write().await;
                // Re-check: the pool may have been used since the scan
                match pools.get(&key) {
                    Some(pool)
                        if pool.in_use() == 0
                            && Instant::now().saturating_duration_since(pool.last_used())
                                >= pool_idle_timeout =>
                    {
                        pools.remove(&key)
                    }
                    _ => None,
                }
            };
            if let Some(pool) = removed {
                info!(pool = %pool, "Removing idle connection pool");
                pool.close().await;
            }
        }
    }

    async fn cleanup_task(weak_manager: Weak<Self>, cleanup_interval: Duration) {
        let mut interval = tokio::time::interval(cleanup_interval);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            let Some(manager) = weak_manager.upgrade() else {
                debug!("Pool manager dropped, reaper exiting");
                return;
            };
            manager.reap().await;
            // Drop strong reference before sleeping to allow manager deallocation
            drop(manager);
        }
    }

    /// Stop the reaper and close every pool.
    pub async fn close_all(&self) {
        if let Some(handle) = self
            .cleanup_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }

        let drained: Vec<_> = {
            let mut pools = self.pools.write().await;
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in drained {
            pool.close().await;
        }
    }
}

impl std::fmt::Debug for ConnectionPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPoolManager")
            .field("options", &self.options)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
