//! Per-endpoint connection pool and its background opener/cleaner tasks.
//! Implements `spec.md §4.4`, `§5`, and `§7` in full.
//!
//! The teacher pools whole clients through `deadpool::managed::Pool`,
//! whose `create`/`recycle`/`max_size` contract has no extension point for
//! an optimistic `in_flight` counter, a waiter map keyed by a monotonic
//! id, or a "pop a free connection, discover it's stale, retry once
//! forcing a fresh open" borrow policy. This pool is hand-written on the
//! same `tokio::sync` primitives the teacher's own `TokioConnection`
//! already reaches for (it wraps its socket in `Arc<Mutex<TcpStream>>`):
//! a `tokio::sync::Mutex` guards the short structural critical section, a
//! `tokio::sync::mpsc` channel is the opener's signal stream, and
//! `tokio::sync::oneshot` fulfills each waiter. See `DESIGN.md` for why
//! `deadpool` was dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::Error;

/// Which timeout a `config_timeout` call is adjusting (`spec.md §6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    PollTimeout,
    ConnectTimeout,
    RetryTimeout,
}

/// Pool configuration. Defaults match `spec.md §4.4` "Configuration."
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// `<= 0` means unlimited.
    pub max_open: i64,
    /// Zero means connections live forever.
    pub max_lifetime: Duration,
    /// `< 0` means unlimited.
    pub max_retries: i64,
    pub connect_timeout: Duration,
    pub poll_timeout: Duration,
    pub retry_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_open: 1,
            max_lifetime: Duration::ZERO,
            max_retries: -1,
            connect_timeout: Duration::from_millis(500),
            poll_timeout: Duration::from_millis(500),
            retry_timeout: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    pub fn apply_timeout(&mut self, kind: TimeoutKind, d: Duration) {
        match kind {
            TimeoutKind::PollTimeout => self.poll_timeout = d,
            TimeoutKind::ConnectTimeout => self.connect_timeout = d,
            TimeoutKind::RetryTimeout => self.retry_timeout = d,
        }
    }
}

struct Inner<C> {
    free_conns: VecDeque<C>,
    in_flight: i64,
    waiters: HashMap<u64, oneshot::Sender<C>>,
    waiter_order: VecDeque<u64>,
    next_waiter_id: u64,
    closed: bool,
    cleaner_running: bool,
}

impl<C> Inner<C> {
    fn new() -> Self {
        Inner {
            free_conns: VecDeque::new(),
            in_flight: 0,
            waiters: HashMap::new(),
            waiter_order: VecDeque::new(),
            next_waiter_id: 0,
            closed: false,
            cleaner_running: false,
        }
    }

    /// Hand `conn` to the oldest live waiter, or push it to the free list
    /// if there is none. Returns the connection back if a waiter's
    /// receiver was already dropped (a rare race), so the caller can try
    /// again or fall back to the free list.
    fn give_to_waiter_or_free(&mut self, conn: C) -> Option<C> {
        while let Some(id) = self.waiter_order.pop_front() {
            if let Some(tx) = self.waiters.remove(&id) {
                match tx.send(conn) {
                    Ok(()) => return None,
                    Err(returned) => return Some(returned),
                }
            }
        }
        self.free_conns.push_back(conn);
        None
    }
}

/// One pool per [`Endpoint`]; a `Client` holds one per server in its
/// `ServerSet` so the pool serializes access to each connection, not
/// across connections (`spec.md §5` "Shared resources").
pub struct Pool<C: Connection> {
    endpoint: Endpoint,
    inner: std::sync::Arc<Mutex<Inner<C>>>,
    config: std::sync::Arc<StdMutex<PoolConfig>>,
    opener_tx: mpsc::UnboundedSender<()>,
}

impl<C: Connection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Pool {
            endpoint: self.endpoint.clone(),
            inner: self.inner.clone(),
            config: self.config.clone(),
            opener_tx: self.opener_tx.clone(),
        }
    }
}

impl<C: Connection> Pool<C> {
    pub fn new(endpoint: Endpoint, config: PoolConfig) -> Self {
        let inner = std::sync::Arc::new(Mutex::new(Inner::new()));
        let config = std::sync::Arc::new(StdMutex::new(config));
        let (opener_tx, opener_rx) = mpsc::unbounded_channel();

        let pool = Pool {
            endpoint,
            inner,
            config,
            opener_tx,
        };
        pool.spawn_opener(opener_rx);
        pool
    }

    pub fn set_config(&self, f: impl FnOnce(&mut PoolConfig)) {
        let mut config = self.config.lock().unwrap();
        f(&mut config);
    }

    fn config_snapshot(&self) -> PoolConfig {
        self.config.lock().unwrap().clone()
    }

    /// The currently configured `poll_timeout`, read by the dispatcher
    /// before driving a command on a borrowed connection.
    pub fn poll_timeout(&self) -> Duration {
        self.config.lock().unwrap().poll_timeout
    }

    /// Implements `spec.md §4.4` "Borrow (ctx)" verbatim, including the
    /// stale-free-connection retry (step 6) and waiter
    /// registration/cancellation-removal (step 5).
    pub async fn borrow(&self, cancel: &CancellationToken) -> Result<C, Error> {
        if cancel.is_cancelled() {
            return Err(Error::ContextCanceled);
        }
        let config = self.config_snapshot();

        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::ClientClosed);
        }
        if let Some(conn) = inner.free_conns.pop_front() {
            let stale = config.max_lifetime > Duration::ZERO
                && conn.created_at().elapsed() > config.max_lifetime;
            if stale {
                inner.in_flight -= 1;
                drop(inner);
                warn!(endpoint = %self.endpoint, "evicted stale free connection on borrow");
                drop(conn);
                return self.open_or_wait(cancel, &config).await;
            }
            drop(inner);
            debug!(endpoint = %self.endpoint, "borrowed a free connection");
            return Ok(conn);
        }
        drop(inner);
        self.open_or_wait(cancel, &config).await
    }

    async fn open_or_wait(&self, cancel: &CancellationToken, config: &PoolConfig) -> Result<C, Error> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::ClientClosed);
        }
        let unlimited = config.max_open <= 0;
        if unlimited || inner.in_flight < config.max_open {
            inner.in_flight += 1;
            drop(inner);
            debug!(endpoint = %self.endpoint, "opening a fresh connection");
            match C::connect(&self.endpoint, config.connect_timeout).await {
                Ok(conn) => Ok(conn),
                Err(e) => {
                    let mut inner = self.inner.lock().await;
                    inner.in_flight -= 1;
                    drop(inner);
                    let _ = self.opener_tx.send(());
                    Err(e)
                }
            }
        } else {
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            let (tx, mut rx) = oneshot::channel();
            inner.waiters.insert(id, tx);
            inner.waiter_order.push_back(id);
            drop(inner);
            let _ = self.opener_tx.send(());
            debug!(endpoint = %self.endpoint, waiter_id = id, "queued as a waiter");

            tokio::select! {
                res = &mut rx => {
                    res.map_err(|_| Error::ClientClosed)
                }
                _ = cancel.cancelled() => {
                    let mut inner = self.inner.lock().await;
                    let removed = inner.waiters.remove(&id);
                    drop(inner);
                    if removed.is_none() {
                        // release() already claimed this waiter slot.
                        if let Ok(conn) = rx.await {
                            self.give_back(conn).await;
                        }
                    }
                    Err(Error::ContextCanceled)
                }
            }
        }
    }

    /// Implements `spec.md §4.4` "Release(cn, err)". `err` is `None` on
    /// success. Bad-connection errors (or a closed pool) drop the
    /// connection and decrement `in_flight`; otherwise a pending waiter
    /// takes it directly, or it returns to `free_conns`.
    pub async fn release(&self, conn: C, err: Option<&Error>) {
        let bad = err.map(|e| e.is_bad_connection()).unwrap_or(false);
        let mut inner = self.inner.lock().await;
        if bad || inner.closed {
            inner.in_flight -= 1;
            let have_waiter = !inner.waiter_order.is_empty();
            drop(inner);
            if bad {
                warn!(endpoint = %self.endpoint, "evicting poisoned connection");
            }
            drop(conn);
            if have_waiter {
                let _ = self.opener_tx.send(());
            }
            return;
        }
        drop(inner);
        self.give_back(conn).await;
        self.ensure_cleaner_running();
    }

    async fn give_back(&self, conn: C) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            inner.in_flight -= 1;
            drop(inner);
            drop(conn);
            return;
        }
        if let Some(bounced) = inner.give_to_waiter_or_free(conn) {
            // the waiter's receiver was dropped; push it to free list instead.
            inner.free_conns.push_back(bounced);
        }
    }

    /// Consumes the opener's signal stream. Each signal means "capacity or
    /// a waiter state may have changed, re-check." Unlike `borrow`'s
    /// synchronous open (step 4), the opener must verify room under
    /// `max_open` itself before incrementing `in_flight`, since it runs
    /// asynchronously from whatever triggered the signal (`spec.md §4.4`
    /// "Opener (background task)").
    fn spawn_opener(&self, mut opener_rx: mpsc::UnboundedReceiver<()>) {
        let endpoint = self.endpoint.clone();
        let inner = self.inner.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            while opener_rx.recv().await.is_some() {
                loop {
                    let cfg = config.lock().unwrap().clone();
                    let mut guard = inner.lock().await;
                    if guard.closed {
                        return;
                    }
                    let have_room = cfg.max_open <= 0 || guard.in_flight < cfg.max_open;
                    let have_waiter = !guard.waiter_order.is_empty();
                    if !have_room || !have_waiter {
                        break;
                    }
                    guard.in_flight += 1;
                    drop(guard);

                    match C::connect(&endpoint, cfg.connect_timeout).await {
                        Ok(conn) => {
                            let mut guard = inner.lock().await;
                            if guard.closed {
                                drop(guard);
                                drop(conn);
                                return;
                            }
                            if let Some(bounced) = guard.give_to_waiter_or_free(conn) {
                                guard.free_conns.push_back(bounced);
                            }
                        }
                        Err(e) => {
                            warn!(endpoint = %endpoint, error = %e, "opener failed to open a connection");
                            let mut guard = inner.lock().await;
                            guard.in_flight -= 1;
                            drop(guard);
                            tokio::time::sleep(cfg.retry_timeout).await;
                        }
                    }
                }
            }
            debug!(endpoint = %endpoint, "opener task exiting");
        });
    }

    fn ensure_cleaner_running(&self) {
        let max_lifetime = self.config.lock().unwrap().max_lifetime;
        if max_lifetime.is_zero() {
            return;
        }
        let mut inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(_) => return,
        };
        if inner.cleaner_running {
            return;
        }
        inner.cleaner_running = true;
        drop(inner);
        self.spawn_cleaner();
    }

    fn spawn_cleaner(&self) {
        let endpoint = self.endpoint.clone();
        let inner = self.inner.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            loop {
                let max_lifetime = config.lock().unwrap().max_lifetime;
                let tick = max_lifetime.max(Duration::from_secs(1));
                tokio::time::sleep(tick).await;

                let mut guard = inner.lock().await;
                let cutoff_exceeded: Vec<usize> = guard
                    .free_conns
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.created_at().elapsed() > max_lifetime)
                    .map(|(i, _)| i)
                    .collect();
                let mut expired = Vec::with_capacity(cutoff_exceeded.len());
                for &i in cutoff_exceeded.iter().rev() {
                    if let Some(conn) = guard.free_conns.remove(i) {
                        expired.push(conn);
                    }
                }
                guard.in_flight -= expired.len() as i64;
                let should_exit = guard.closed || guard.in_flight == 0;
                if should_exit {
                    guard.cleaner_running = false;
                }
                drop(guard);

                for conn in expired {
                    drop(conn);
                }
                if should_exit {
                    debug!(endpoint = %endpoint, "cleaner task exiting");
                    break;
                }
            }
        });
    }

    /// Closes the pool: no further borrow succeeds, the opener's signal
    /// channel is closed (which ends its task), and free connections are
    /// closed (`spec.md §3` invariant).
    pub async fn quit(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        let free: Vec<C> = inner.free_conns.drain(..).collect();
        inner.in_flight -= free.len() as i64;
        inner.waiters.clear();
        drop(inner);
        for mut conn in free {
            conn.quit().await;
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    struct TestConn {
        state: ConnectionState,
        id: usize,
    }

    #[async_trait]
    impl Connection for TestConn {
        async fn connect(_endpoint: &Endpoint, _connect_timeout: Duration) -> Result<Self, Error> {
            Ok(TestConn {
                state: ConnectionState::new(),
                id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            })
        }
        async fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Error> {
            Ok(0)
        }
        async fn write(&mut self, _data: &[u8]) -> Result<(), Error> {
            Ok(())
        }
        fn state(&self) -> &ConnectionState {
            &self.state
        }
        fn state_mut(&mut self) -> &mut ConnectionState {
            &mut self.state
        }
    }

    fn test_endpoint() -> Endpoint {
        Endpoint::new("localhost", 11211, None)
    }

    /// `spec.md §8` property 13: pool cap under concurrent borrows.
    #[test]
    fn test_pool_cap_under_concurrent_borrows() {
        tokio_test::block_on(async {
            let config = PoolConfig {
                max_open: 10,
                ..Default::default()
            };
            let pool = Arc::new(Pool::<TestConn>::new(test_endpoint(), config));

            let mut handles = Vec::new();
            for _ in 0..20 {
                let pool = pool.clone();
                handles.push(tokio::spawn(async move {
                    let cancel = CancellationToken::new();
                    let conn = pool.borrow(&cancel).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    pool.release(conn, None).await;
                }));
            }
            for h in handles {
                h.await.unwrap();
            }

            let inner = pool.inner.lock().await;
            assert!(inner.free_conns.len() as i64 <= 10);
            assert!(inner.in_flight <= 10);
        });
    }

    #[test]
    fn test_borrow_reuses_released_connection() {
        tokio_test::block_on(async {
            let pool = Pool::<TestConn>::new(test_endpoint(), PoolConfig::default());
            let cancel = CancellationToken::new();
            let conn = pool.borrow(&cancel).await.unwrap();
            let id = conn.id;
            pool.release(conn, None).await;
            let conn2 = pool.borrow(&cancel).await.unwrap();
            assert_eq!(id, conn2.id);
        });
    }

    #[test]
    fn test_bad_connection_error_is_not_reused() {
        tokio_test::block_on(async {
            let pool = Pool::<TestConn>::new(test_endpoint(), PoolConfig::default());
            let cancel = CancellationToken::new();
            let conn = pool.borrow(&cancel).await.unwrap();
            let id = conn.id;
            let err = Error::NetworkError(crate::error::NetworkErrorKind::Recv("x".into()));
            pool.release(conn, Some(&err)).await;
            let conn2 = pool.borrow(&cancel).await.unwrap();
            assert_ne!(id, conn2.id);
        });
    }

    /// `spec.md §8` property 15: quit accounting.
    #[test]
    fn test_quit_closes_pool_and_rejects_further_borrows() {
        tokio_test::block_on(async {
            let pool = Pool::<TestConn>::new(test_endpoint(), PoolConfig::default());
            let cancel = CancellationToken::new();
            let conn = pool.borrow(&cancel).await.unwrap();
            pool.release(conn, None).await;
            pool.quit().await;

            let err = pool.borrow(&cancel).await.unwrap_err();
            assert_eq!(Error::ClientClosed, err);
        });
    }

    #[test]
    fn test_already_canceled_token_short_circuits() {
        tokio_test::block_on(async {
            let pool = Pool::<TestConn>::new(test_endpoint(), PoolConfig::default());
            let cancel = CancellationToken::new();
            cancel.cancel();
            let err = pool.borrow(&cancel).await.unwrap_err();
            assert_eq!(Error::ContextCanceled, err);
        });
    }

    /// `spec.md §8` property 14: cleaner eviction.
    #[test]
    fn test_cleaner_evicts_after_max_lifetime() {
        tokio_test::block_on(async {
            let config = PoolConfig {
                max_lifetime: Duration::from_millis(50),
                ..Default::default()
            };
            let pool = Pool::<TestConn>::new(test_endpoint(), config);
            let cancel = CancellationToken::new();
            let conn = pool.borrow(&cancel).await.unwrap();
            pool.release(conn, None).await;

            tokio::time::sleep(Duration::from_millis(1200)).await;

            let inner = pool.inner.lock().await;
            assert_eq!(0, inner.free_conns.len());
            assert_eq!(0, inner.in_flight);
        });
    }
}
