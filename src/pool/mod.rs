//! Connection pooling and circuit breaker module
//!
//! This module provides:
//! - A fixed-size pool of live connections with blocking borrow/return
//! - A failure-rate circuit breaker gating every connection attempt
//! - A listener task mapping breaker events onto the pool status
//! - Automatic pool regeneration once a trip has cooled down

pub mod circuit;
pub mod controller;
pub mod listener;
pub mod provider;
pub mod store;

pub use circuit::{BreakerError, BreakerEvent, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
pub use controller::{InitError, Pool, PoolError, PoolStats};
pub use listener::PoolStatus;
pub use provider::{BoxError, ConnectionProvider};
pub use store::{Slot, SlotStore, StoreRetired};
