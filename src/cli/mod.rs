//! CLI module for pgbreaker
//!
//! Operator commands for inspecting a pool against a live database:
//!
//! ```bash
//! # Initialize a pool and print its status
//! pgbreaker check --json
//!
//! # Run SELECT 1 through the pool
//! pgbreaker ping --count 10
//!
//! # Keep pinging and report status transitions
//! pgbreaker watch --interval-ms 500
//! ```

pub mod commands;

use tracing::warn;

use crate::config::PoolOptions;
use crate::pool::Pool;
use crate::postgres::PgProvider;

/// Create a PostgreSQL pool, keeping it even if initialization failed
///
/// A failed pool regenerates itself once its cooldown has elapsed, so
/// long-running commands carry on with it.
pub async fn open_pool(options: PoolOptions) -> Pool<PgProvider> {
    match Pool::init(options, PgProvider).await {
        Ok(pool) => pool,
        Err(err) => {
            warn!(error = %err.error, "Pool initialization failed, waiting for regeneration");
            err.into_pool()
        }
    }
}
