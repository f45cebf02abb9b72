//! Pool controller
//!
//! Owns the configuration, the breaker and the current slot store, and ties
//! them together:
//! - population of a fresh store, tolerant at startup and strict on rebuild
//! - breaker-gated borrow/return around caller callbacks
//! - regeneration of a tripped pool once its cooldown has elapsed
//!
//! Rebuilding never mutates a store in place. A new store replaces the old
//! one, which is retired: its idle connections are closed, connections still
//! checked out from it are closed when they come back, and callers waiting on
//! it are turned away.

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::circuit::{BreakerError, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
use super::listener::{self, PoolStatus, StatusCell};
use super::provider::{BoxError, ConnectionProvider};
use super::store::{Slot, SlotStore};
use crate::config::{PoolConfig, PoolOptions};

/// Error types for pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("No connection target configured")]
    NoTarget,

    #[error("Circuit breaker is open, connection not attempted")]
    Unavailable,

    #[error("Service unavailable")]
    ServiceUnavailable,

    #[error("Borrowed slot holds no connection")]
    EmptyConnection,

    #[error("Failed to create connection pool")]
    PoolCreationFailed,

    #[error("Failed to rebuild connection pool")]
    PoolRebuildFailed,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to connect: {0}")]
    Connect(#[source] BoxError),

    /// Error returned by the caller's callback, passed through untouched
    #[error("{0}")]
    Callback(BoxError),
}

/// Returned by [`Pool::init`] when the initial population tripped the breaker
///
/// The pool is still usable: it starts out `Failed` and regenerates itself
/// once the cooldown has elapsed.
pub struct InitError<P: ConnectionProvider> {
    pub pool: Pool<P>,
    pub error: PoolError,
}

impl<P: ConnectionProvider> InitError<P> {
    /// Keep the failed pool and let it recover on its own
    pub fn into_pool(self) -> Pool<P> {
        self.pool
    }
}

impl<P: ConnectionProvider> fmt::Debug for InitError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitError")
            .field("pool", &self.pool)
            .field("error", &self.error)
            .finish()
    }
}

impl<P: ConnectionProvider> fmt::Display for InitError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<P: ConnectionProvider> std::error::Error for InitError<P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub status: PoolStatus,

    /// Configured number of slots
    pub size: usize,

    /// Slots waiting in the store
    pub idle: usize,

    /// Slots currently borrowed
    pub checked_out: usize,

    /// Idle slots without a connection
    pub empty_slots: usize,

    /// Failed connection attempts since the last reset
    pub failures: u64,

    /// Consecutive unsuccessful regeneration attempts
    pub regeneration_attempts: u64,

    pub breaker: BreakerStats,
}

struct PoolInner<P: ConnectionProvider> {
    config: PoolConfig,

    provider: Arc<P>,

    breaker: CircuitBreaker,

    status: Arc<StatusCell>,

    store: RwLock<Arc<SlotStore<P::Connection>>>,

    /// Serializes population, regeneration and shutdown
    rebuild: Mutex<()>,

    failures: AtomicU64,

    regeneration_attempts: AtomicU64,

    closed: AtomicBool,

    listener: JoinHandle<()>,
}

/// Fixed-size connection pool guarded by a circuit breaker
pub struct Pool<P: ConnectionProvider> {
    inner: Arc<PoolInner<P>>,
}

impl<P: ConnectionProvider> Clone for Pool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ConnectionProvider> fmt::Debug for Pool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("pool_size", &self.inner.config.pool_size)
            .field("status", &self.state())
            .finish()
    }
}

impl<P: ConnectionProvider> Pool<P> {
    /// Normalize `options` and create a populated pool
    pub async fn init(options: PoolOptions, provider: P) -> Result<Self, InitError<P>> {
        Self::with_config(PoolConfig::from_options(&options), provider).await
    }

    /// Create a populated pool from an already normalized configuration
    ///
    /// Individual connection failures leave empty slots behind. Only when
    /// they trip the breaker does initialization fail, and the failed pool is
    /// handed back inside the error.
    pub async fn with_config(config: PoolConfig, provider: P) -> Result<Self, InitError<P>> {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            fail_rate: config.fail_rate,
            universe: config.universe,
        });
        let status = Arc::new(StatusCell::new(PoolStatus::Ready));
        let listener = listener::spawn(breaker.subscribe(), Arc::clone(&status));

        info!(
            pool_size = config.pool_size,
            fail_rate = config.fail_rate,
            universe = config.universe,
            timeout_ms = config.timeout.as_millis() as u64,
            cooldown_ms = config.regeneration_cooldown.as_millis() as u64,
            "Initializing connection pool"
        );

        let store = Arc::new(SlotStore::new(config.pool_size));
        let pool = Self {
            inner: Arc::new(PoolInner {
                config,
                provider: Arc::new(provider),
                breaker,
                status,
                store: RwLock::new(store),
                rebuild: Mutex::new(()),
                failures: AtomicU64::new(0),
                regeneration_attempts: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                listener,
            }),
        };

        let populated = {
            let _rebuild = pool.inner.rebuild.lock().await;
            pool.inner.populate(false).await
        };

        match populated {
            Ok(()) => {
                pool.inner.status.set(PoolStatus::Ready);
                info!(
                    failures = pool.inner.failures.load(Ordering::Relaxed),
                    "Connection pool ready"
                );
                Ok(pool)
            }
            Err(error) => {
                let error = match error {
                    PoolError::PoolRebuildFailed => PoolError::PoolCreationFailed,
                    other => other,
                };
                pool.inner.status.set(PoolStatus::Failed);
                warn!(%error, "Connection pool starts in failed state");
                Err(InitError { pool, error })
            }
        }
    }

    /// Run `callback` against a pooled connection
    ///
    /// A `Failed` pool first tries to regenerate and then rejects the call;
    /// a `Regenerating` pool rejects it outright. Otherwise the call waits
    /// for a free slot. The callback's own error is returned as
    /// [`PoolError::Callback`] and does not count against the breaker; a
    /// timeout does.
    pub async fn execute<F, T, E>(&self, callback: F) -> Result<T, PoolError>
    where
        F: for<'c> FnOnce(&'c mut P::Connection) -> BoxFuture<'c, Result<T, E>>,
        E: Into<BoxError>,
    {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::ServiceUnavailable);
        }

        match inner.status.get() {
            PoolStatus::Failed => {
                inner.regenerate().await;
                return Err(PoolError::ServiceUnavailable);
            }
            PoolStatus::Regenerating => return Err(PoolError::ServiceUnavailable),
            PoolStatus::Ready => {}
        }

        let mut checkout = inner.checkout().await?;
        let Some(connection) = checkout.connection() else {
            inner.breaker.fail().await;
            return Err(PoolError::EmptyConnection);
        };

        // The callback's result travels as the success value so that only
        // timeouts reach the breaker as failures.
        let outcome = inner
            .breaker
            .call(
                async move { Ok::<_, Infallible>(callback(connection).await) },
                inner.config.timeout,
            )
            .await;

        match outcome {
            Ok(result) => result.map_err(|error| PoolError::Callback(error.into())),
            Err(BreakerError::Open) => Err(PoolError::ServiceUnavailable),
            Err(BreakerError::Timeout(after)) => Err(PoolError::Timeout(after)),
            Err(BreakerError::Inner(never)) => match never {},
        }
    }

    /// Close every idle connection and stop serving callers
    ///
    /// Connections that are checked out are closed when they are returned.
    pub async fn close(&self) {
        let _rebuild = self.inner.rebuild.lock().await;
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let store = Arc::clone(&self.inner.store.read());
        self.inner.drain(&store).await;
        info!("Connection pool closed");
    }

    /// The resolved connection target
    pub fn url(&self) -> Option<&str> {
        self.inner.config.url.as_deref()
    }

    /// Current pool status
    pub fn state(&self) -> PoolStatus {
        self.inner.status.get()
    }

    /// The normalized configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get pool statistics
    pub async fn stats(&self) -> PoolStats {
        let store = Arc::clone(&self.inner.store.read());
        PoolStats {
            status: self.state(),
            size: store.capacity(),
            idle: store.idle(),
            checked_out: store.checked_out(),
            empty_slots: store.empty_slots(),
            failures: self.inner.failures.load(Ordering::Relaxed),
            regeneration_attempts: self.inner.regeneration_attempts.load(Ordering::Relaxed),
            breaker: self.inner.breaker.stats().await,
        }
    }
}

impl<P: ConnectionProvider> PoolInner<P> {
    /// Open and ping one connection through the breaker
    async fn connect(&self) -> Result<P::Connection, PoolError> {
        let url = self.config.url.as_deref().ok_or(PoolError::NoTarget)?;
        let provider = &self.provider;

        let opened = self
            .breaker
            .call(
                async move {
                    let connection = provider.open(url).await?;
                    if let Err(error) = provider.ping(&connection).await {
                        provider.close(connection).await;
                        return Err(error);
                    }
                    Ok::<_, BoxError>(connection)
                },
                self.config.timeout,
            )
            .await;

        opened.map_err(|error| match error {
            BreakerError::Open => PoolError::Unavailable,
            BreakerError::Timeout(after) => PoolError::Timeout(after),
            BreakerError::Inner(source) => PoolError::Connect(source),
        })
    }

    /// Replace the current store with a freshly populated one
    ///
    /// In strict mode the first failed attempt aborts and is returned; the new
    /// store keeps the slots filled so far. Otherwise every attempt runs and
    /// failures leave empty slots.
    async fn populate(&self, strict: bool) -> Result<(), PoolError> {
        let store = Arc::new(SlotStore::new(self.config.pool_size));
        let previous = std::mem::replace(&mut *self.store.write(), Arc::clone(&store));
        self.drain(&previous).await;

        for slot_index in 0..self.config.pool_size {
            let slot = match self.connect().await {
                Ok(connection) => Some(connection),
                Err(error) if strict => {
                    warn!(slot = slot_index, %error, "Connection attempt failed, aborting rebuild");
                    return Err(error);
                }
                Err(error) => {
                    let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        slot = slot_index,
                        failures = failures,
                        %error,
                        "Connection attempt failed, leaving slot empty"
                    );
                    None
                }
            };

            if let Err(Some(connection)) = store.put(slot) {
                self.provider.close(connection).await;
            }
        }

        if self.breaker.is_tripped().await {
            return Err(PoolError::PoolRebuildFailed);
        }

        Ok(())
    }

    /// Rebuild a tripped pool once its cooldown has elapsed
    ///
    /// Concurrent callers do not queue up: whoever finds a rebuild in
    /// progress returns immediately.
    async fn regenerate(&self) {
        let Ok(_rebuild) = self.rebuild.try_lock() else {
            debug!("Regeneration already in progress");
            return;
        };

        if self.closed.load(Ordering::Acquire) {
            return;
        }

        // Only a tripped breaker carries a trip instant
        let Some(tripped_at) = self.breaker.tripped_at().await else {
            return;
        };
        let elapsed = tripped_at.elapsed();
        if elapsed < self.config.regeneration_cooldown {
            debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                cooldown_ms = self.config.regeneration_cooldown.as_millis() as u64,
                "Cooldown not elapsed, skipping regeneration"
            );
            return;
        }

        let attempt = self.regeneration_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        info!(attempt = attempt, "Regenerating connection pool");

        self.reset().await;

        match self.populate(true).await {
            Ok(()) => {
                self.regeneration_attempts.store(0, Ordering::Relaxed);
                info!(attempt = attempt, "Connection pool regenerated");
            }
            Err(error) => {
                warn!(attempt = attempt, %error, "Connection pool regeneration failed");
                if !self.breaker.is_tripped().await {
                    self.breaker.trip().await;
                }
            }
        }
    }

    /// Close the current store and clear breaker and failure state
    async fn reset(&self) {
        let current = Arc::clone(&self.store.read());
        self.drain(&current).await;

        self.breaker.reset().await;
        self.failures.store(0, Ordering::Relaxed);
    }

    /// Retire `store` and close its idle connections
    async fn drain(&self, store: &SlotStore<P::Connection>) {
        let connections = store.retire();
        if !connections.is_empty() {
            debug!(count = connections.len(), "Closing idle connections");
        }
        for connection in connections {
            self.provider.close(connection).await;
        }
    }

    async fn checkout(&self) -> Result<Checkout<P>, PoolError> {
        let store = Arc::clone(&self.store.read());
        let slot = store
            .take()
            .await
            .map_err(|_| PoolError::ServiceUnavailable)?;

        Ok(Checkout {
            slot: Some(slot),
            store,
            provider: Arc::clone(&self.provider),
        })
    }
}

impl<P: ConnectionProvider> Drop for PoolInner<P> {
    fn drop(&mut self) {
        self.listener.abort();
        for connection in self.store.get_mut().retire() {
            close_detached(Arc::clone(&self.provider), connection);
        }
    }
}

/// Close a connection from synchronous code
fn close_detached<P: ConnectionProvider>(provider: Arc<P>, connection: P::Connection) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                provider.close(connection).await;
            });
        }
        Err(_) => drop(connection),
    }
}

/// A borrowed slot; goes back to its store when dropped
struct Checkout<P: ConnectionProvider> {
    slot: Option<Slot<P::Connection>>,
    store: Arc<SlotStore<P::Connection>>,
    provider: Arc<P>,
}

impl<P: ConnectionProvider> Checkout<P> {
    fn connection(&mut self) -> Option<&mut P::Connection> {
        self.slot.as_mut().and_then(Option::as_mut)
    }
}

impl<P: ConnectionProvider> Drop for Checkout<P> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            if let Err(Some(connection)) = self.store.put(slot) {
                debug!("Closing connection returned to a retired store");
                close_detached(Arc::clone(&self.provider), connection);
            }
        }
    }
}
