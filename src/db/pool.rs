//! Bounded pool of engine connections for one [`PoolKey`].
//!
//! # Invariants
//!
//! - At most `max_connections` handles exist at any time. A semaphore permit is
//!   taken before a handle is reused or opened and is only returned after the
//!   handle has been checked back in or closed.
//! - A handle is lent to one caller at a time; [`PooledConnection`] owns it
//!   until drop.
//! - A handle that saw a connection fault, or whose statement was abandoned
//!   mid-flight (timeout or cancellation), is closed on return instead of
//!   being reused.
//! - Idle handles past the idle timeout or the max lifetime are never handed
//!   out; they are closed lazily on acquire and eagerly by the reaper.
//! - A returned handle has its session reset (and is pinged when
//!   `test_on_release` is set) before it goes back on the free list. Both are
//!   bounded by the connect timeout; a handle that fails or stalls is closed.

use crate::config::PoolOptions;
use crate::db::adapter::{BindValue, EngineAdapter, EngineConnection};
use crate::db::normalize::NativeResult;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, PoolKey, PoolStats};
use crate::secret::SecretResolver;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct IdleConnection {
    conn: Box<dyn EngineConnection>,
    created_at: Instant,
    idle_since: Instant,
}

pub struct ConnectionPool {
    key: PoolKey,
    fingerprint: String,
    profile: ConnectionProfile,
    adapter: Arc<dyn EngineAdapter>,
    secrets: Arc<dyn SecretResolver>,
    options: PoolOptions,
    connect_timeout: Duration,
    permits: Arc<Semaphore>,
    /// LIFO stack of idle handles; the most recently returned is reused first.
    /// std Mutex: never held across an await.
    idle: Mutex<VecDeque<IdleConnection>>,
    /// Open handles, idle plus lent out.
    live: AtomicUsize,
    in_use: AtomicUsize,
    last_used: RwLock<Instant>,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(
        profile: ConnectionProfile,
        adapter: Arc<dyn EngineAdapter>,
        secrets: Arc<dyn SecretResolver>,
        options: PoolOptions,
        connect_timeout: Duration,
    ) -> Arc<Self> {
        let key = profile.pool_key();
        let fingerprint = key.to_string();
        let max = options.max_connections_or_default() as usize;
        Arc::new(Self {
            key,
            fingerprint,
            profile,
            adapter,
            secrets,
            options,
            connect_timeout,
            permits: Arc::new(Semaphore::new(max)),
            idle: Mutex::new(VecDeque::new()),
            live: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            last_used: RwLock::new(Instant::now()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// `engine:fingerprint`, safe to log.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Borrow a handle, waiting up to the acquire timeout for a free slot.
    pub async fn acquire(self: &Arc<Self>) -> DbResult<PooledConnection> {
        let wait = self.options.acquire_timeout_or_default();
        let started = Instant::now();

        let permit = match tokio::time::timeout(wait, Arc::clone(&self.permits).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DbError::internal(format!("Pool {} is closed", self))),
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(pool = %self, waited_ms, "Connection pool exhausted");
                return Err(DbError::pool_exhausted(self.fingerprint.clone(), waited_ms));
            }
        };
        self.touch();

        while let Some(idle) = self.pop_idle() {
            if self.is_expired(idle.created_at, idle.idle_since, Instant::now()) {
                debug!(pool = %self, "Discarding expired idle connection");
                self.discard(idle.conn).await;
                continue;
            }
            return Ok(PooledConnection::lend(self, idle.conn, idle.created_at, permit));
        }

        let conn = self.open().await?;
        Ok(PooledConnection::lend(self, conn, Instant::now(), permit))
    }

    /// Borrow an idle handle only if one is free right now. Never waits and
    /// never opens a connection.
    pub async fn try_acquire_idle(self: &Arc<Self>) -> Option<PooledConnection> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        while let Some(idle) = self.pop_idle() {
            if self.is_expired(idle.created_at, idle.idle_since, Instant::now()) {
                self.discard(idle.conn).await;
                continue;
            }
            self.touch();
            return Some(PooledConnection::lend(self, idle.conn, idle.created_at, permit));
        }
        None
    }

    async fn open(&self) -> DbResult<Box<dyn EngineConnection>> {
        let secret = self.secrets.resolve(self.profile.secret_ref()).await?;
        let conn = self
            .adapter
            .open(&self.profile, &secret, self.connect_timeout)
            .await?;
        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(pool = %self, live, "Opened new connection");
        Ok(conn)
    }

    fn pop_idle(&self) -> Option<IdleConnection> {
        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_back()
    }

    fn is_expired(&self, created_at: Instant, idle_since: Instant, now: Instant) -> bool {
        now.saturating_duration_since(idle_since) >= self.options.max_idle_or_default()
            || self.is_past_lifetime(created_at, now)
    }

    fn is_past_lifetime(&self, created_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(created_at) >= self.options.max_lifetime_or_default()
    }

    async fn discard(&self, conn: Box<dyn EngineConnection>) {
        if tokio::time::timeout(self.connect_timeout, conn.close())
            .await
            .is_err()
        {
            debug!(pool = %self, "Close did not finish in time, dropping connection");
        }
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }

    /// Return a handle after use. Runs on a spawned task; the caller's permit
    /// is released only when this finishes.
    async fn check_in(&self, mut conn: Box<dyn EngineConnection>, created_at: Instant, reusable: bool) {
        let now = Instant::now();
        if !reusable || self.closed.load(Ordering::Acquire) || self.is_past_lifetime(created_at, now)
        {
            debug!(pool = %self, reusable, "Closing returned connection");
            self.discard(conn).await;
            return;
        }

        let test_on_release = self.options.test_on_release_or_default();
        let validation = tokio::time::timeout(self.connect_timeout, async {
            conn.reset().await?;
            if test_on_release {
                conn.ping().await?;
            }
            Ok::<(), DbError>(())
        })
        .await;
        match validation {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(pool = %self, error = %e, "Returned connection failed validation");
                self.discard(conn).await;
                return;
            }
            Err(_) => {
                warn!(
                    pool = %self,
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "Returned connection stalled during validation"
                );
                self.discard(conn).await;
                return;
            }
        }

        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(IdleConnection {
                conn,
                created_at,
                idle_since: Instant::now(),
            });
    }

    /// Close idle handles past the idle timeout or max lifetime. Returns how many.
    pub async fn reap_idle(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<_> = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            let (expired, keep): (VecDeque<_>, VecDeque<_>) = idle
                .drain(..)
                .partition(|c| self.is_expired(c.created_at, c.idle_since, now));
            *idle = keep;
            expired.into_iter().collect()
        };

        let count = expired.len();
        for idle in expired {
            self.discard(idle.conn).await;
        }
        if count > 0 {
            debug!(pool = %self, closed = count, "Reaped idle connections");
        }
        count
    }

    pub(crate) fn touch(&self) {
        *self.last_used.write().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            fingerprint: self.fingerprint.clone(),
            engine: self.key.engine().as_str().to_string(),
            size: self.live.load(Ordering::Acquire),
            idle: self.idle.lock().unwrap_or_else(|e| e.into_inner()).len(),
            in_use: self.in_use(),
            max_size: self.options.max_connections_or_default() as usize,
        }
    }

    /// Close idle handles and refuse new acquisitions. Lent handles are
    /// closed when they come back.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        let drained: Vec<_> = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.drain(..).collect()
        };
        for idle in drained {
            self.discard(idle.conn).await;
        }
        info!(pool = %self, "Closed connection pool");
    }
}

impl std::fmt::Display for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fingerprint)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("fingerprint", &self.fingerprint)
            .field("live", &self.live.load(Ordering::Relaxed))
            .field("in_use", &self.in_use.load(Ordering::Relaxed))
            .finish()
    }
}

/// A handle lent out by a [`ConnectionPool`]. Returned to the pool on drop.
pub struct PooledConnection {
    conn: Option<Box<dyn EngineConnection>>,
    created_at: Instant,
    broken: bool,
    /// Set while a statement is running; still set on drop means the caller
    /// abandoned the statement and the session state is unknown.
    in_flight: bool,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    fn lend(
        pool: &Arc<ConnectionPool>,
        conn: Box<dyn EngineConnection>,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        pool.in_use.fetch_add(1, Ordering::AcqRel);
        Self {
            conn: Some(conn),
            created_at,
            broken: false,
            in_flight: false,
            permit: Some(permit),
            pool: Arc::clone(pool),
        }
    }

    pub async fn run(&mut self, sql: &str) -> DbResult<NativeResult> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| DbError::internal("Connection already returned"))?;
        self.in_flight = true;
        let result = conn.run(sql).await;
        self.in_flight = false;
        if let Err(e) = &result {
            if e.is_connection_fault() {
                self.broken = true;
            }
        }
        result
    }

    /// Run `sql` with positional parameters in the engine's placeholder syntax.
    pub async fn run_with_params(
        &mut self,
        sql: &str,
        params: &[BindValue],
    ) -> DbResult<NativeResult> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| DbError::internal("Connection already returned"))?;
        self.in_flight = true;
        let result = conn.run_with_params(sql, params).await;
        self.in_flight = false;
        if let Err(e) = &result {
            if e.is_connection_fault() {
                self.broken = true;
            }
        }
        result
    }

    pub async fn ping(&mut self) -> DbResult<()> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| DbError::internal("Connection already returned"))?;
        self.in_flight = true;
        let result = conn.ping().await;
        self.in_flight = false;
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    /// Close this handle on return instead of reusing it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = Arc::clone(&self.pool);
        let created_at = self.created_at;
        let reusable = !self.broken && !self.in_flight;
        pool.in_use.fetch_sub(1, Ordering::AcqRel);
        pool.touch();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    pool.check_in(conn, created_at, reusable).await;
                    drop(permit);
                });
            }
            Err(_) => {
                // Runtime gone: nothing can drive a graceful close
                pool.live.fetch_sub(1, Ordering::AcqRel);
                drop(conn);
                drop(permit);
            }
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.fingerprint)
            .field("broken", &self.broken)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
