//! Rate-based circuit breaker for the connection pool
//!
//! The breaker counts successful and failed calls since its last reset and
//! trips once the failure rate reaches the configured threshold over at
//! least `universe` samples:
//! - Closed: calls are allowed and counted
//! - Tripped: calls are rejected until the breaker is reset
//! - Half-open: right after a reset; the first successful call closes it
//!
//! Every transition is published to subscribers as a [`BreakerEvent`], which
//! is how the pool learns that it has to stop serving connections.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Circuit breaker error types
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("Circuit breaker is open")]
    Open,

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Inner(E),
}

/// Events published by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEvent {
    /// The failure rate crossed the threshold, or the breaker was tripped manually
    Tripped,

    /// Counters were cleared and the breaker went half-open
    Reset,

    /// The first call after a reset succeeded
    Ready,

    /// A single call failed
    Fail,
}

impl BreakerEvent {
    /// Get a human-readable event name
    pub fn name(&self) -> &str {
        match self {
            BreakerEvent::Tripped => "tripped",
            BreakerEvent::Reset => "reset",
            BreakerEvent::Ready => "ready",
            BreakerEvent::Fail => "fail",
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate in [0, 1] at which the breaker trips
    pub fail_rate: f64,

    /// Minimum number of samples before the rate is considered
    pub universe: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            fail_rate: 0.5,
            universe: 5,
        }
    }
}

/// Counters since the last reset
#[derive(Debug, Default)]
struct BreakerState {
    tripped: bool,

    /// When the breaker last tripped; cleared by a reset
    tripped_at: Option<Instant>,

    /// Set by a reset, cleared by the next success
    half_open: bool,

    successes: u64,

    failures: u64,

    consecutive_failures: u64,

    /// Number of times the breaker has tripped over its lifetime
    trip_count: u64,
}

impl BreakerState {
    fn samples(&self) -> u64 {
        self.successes + self.failures
    }

    fn error_rate(&self) -> f64 {
        let samples = self.samples();
        if samples == 0 {
            return 0.0;
        }
        self.failures as f64 / samples as f64
    }

    fn should_trip(&self, config: &CircuitBreakerConfig) -> bool {
        self.samples() >= config.universe && self.error_rate() >= config.fail_rate
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BreakerStats {
    /// Whether calls are currently rejected
    pub tripped: bool,

    /// Successful calls since the last reset
    pub successes: u64,

    /// Failed calls since the last reset
    pub failures: u64,

    /// Consecutive failures since the last success
    pub consecutive_failures: u64,

    /// Failure rate since the last reset
    pub error_rate: f64,

    /// Number of times the breaker has tripped
    pub trip_count: u64,
}

/// Failure-rate circuit breaker with an event stream
pub struct CircuitBreaker {
    state: RwLock<BreakerState>,

    config: CircuitBreakerConfig,

    subscribers: parking_lot::Mutex<Vec<mpsc::UnboundedSender<BreakerEvent>>>,
}

impl CircuitBreaker {
    /// Create a new, closed circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: RwLock::new(BreakerState::default()),
            config,
            subscribers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to breaker events
    ///
    /// The stream ends once the breaker is dropped.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BreakerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Run `operation` under the breaker
    ///
    /// A tripped breaker rejects the call without polling the operation. An
    /// error or a timeout counts as a failure, anything else as a success.
    /// A zero `timeout` disables the deadline.
    pub async fn call<F, T, E>(&self, operation: F, timeout: Duration) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if self.is_tripped().await {
            return Err(BreakerError::Open);
        }

        let outcome = if timeout.is_zero() {
            operation.await.map_err(BreakerError::Inner)
        } else {
            match tokio::time::timeout(timeout, operation).await {
                Ok(result) => result.map_err(BreakerError::Inner),
                Err(_) => Err(BreakerError::Timeout(timeout)),
            }
        };

        match &outcome {
            Ok(_) => self.success().await,
            Err(_) => self.fail().await,
        }

        outcome
    }

    /// Record a successful call
    pub async fn success(&self) {
        let mut state = self.state.write().await;
        state.successes += 1;
        state.consecutive_failures = 0;

        if state.half_open {
            state.half_open = false;
            info!("Circuit breaker ready after reset");
            self.emit(BreakerEvent::Ready);
        }
    }

    /// Record a failed call, tripping the breaker when the rate is exceeded
    pub async fn fail(&self) {
        let mut state = self.state.write().await;
        state.failures += 1;
        state.consecutive_failures += 1;

        debug!(
            failures = state.failures,
            samples = state.samples(),
            error_rate = state.error_rate(),
            "Breaker recorded failure"
        );
        self.emit(BreakerEvent::Fail);

        if !state.tripped && state.should_trip(&self.config) {
            warn!(
                failures = state.failures,
                samples = state.samples(),
                fail_rate = self.config.fail_rate,
                "Circuit breaker tripped"
            );
            Self::mark_tripped(&mut state);
            self.emit(BreakerEvent::Tripped);
        }
    }

    /// Trip the breaker regardless of its counters
    pub async fn trip(&self) {
        let mut state = self.state.write().await;
        Self::mark_tripped(&mut state);
        warn!(trip_count = state.trip_count, "Circuit breaker tripped manually");
        self.emit(BreakerEvent::Tripped);
    }

    /// Clear all counters and leave the breaker half-open
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        let trip_count = state.trip_count;
        *state = BreakerState {
            half_open: true,
            trip_count,
            ..BreakerState::default()
        };
        info!("Circuit breaker reset");
        self.emit(BreakerEvent::Reset);
    }

    /// Check whether calls are currently rejected
    pub async fn is_tripped(&self) -> bool {
        self.state.read().await.tripped
    }

    /// When the breaker tripped, or `None` while it is not tripped
    pub async fn tripped_at(&self) -> Option<Instant> {
        self.state.read().await.tripped_at
    }

    /// Get breaker statistics
    pub async fn stats(&self) -> BreakerStats {
        let state = self.state.read().await;
        BreakerStats {
            tripped: state.tripped,
            successes: state.successes,
            failures: state.failures,
            consecutive_failures: state.consecutive_failures,
            error_rate: state.error_rate(),
            trip_count: state.trip_count,
        }
    }

    fn mark_tripped(state: &mut BreakerState) {
        state.tripped = true;
        state.tripped_at = Some(Instant::now());
        state.half_open = false;
        state.trip_count += 1;
    }

    // Called with the state lock held so subscribers see events in the order
    // the state changed.
    fn emit(&self, event: BreakerEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event).is_ok());
    }
}
