//! pgbreaker - fixed-size PostgreSQL connection pool guarded by a circuit breaker

#[cfg(feature = "postgres")]
pub mod cli;
pub mod config;
pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use config::{PoolConfig, PoolOptions};
pub use pool::{ConnectionProvider, Pool, PoolError, PoolStatus};
