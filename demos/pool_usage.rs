//! Example demonstrating the pool and its circuit breaker
//!
//! This example shows how to:
//! 1. Plug a custom connection provider into the pool
//! 2. Run callbacks against pooled connections
//! 3. Watch the breaker trip during an outage
//! 4. Watch the pool regenerate once the backend is back

use async_trait::async_trait;
use futures::future::BoxFuture;
use pgbreaker::pool::{BoxError, ConnectionProvider, Pool, PoolError};
use pgbreaker::PoolOptions;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A pretend database that can be switched off
#[derive(Clone, Default)]
struct SimulatedDb {
    down: Arc<AtomicBool>,
    next_id: Arc<AtomicUsize>,
}

struct SimulatedConn {
    id: usize,
    down: Arc<AtomicBool>,
}

#[async_trait]
impl ConnectionProvider for SimulatedDb {
    type Connection = SimulatedConn;

    async fn open(&self, url: &str) -> Result<SimulatedConn, BoxError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.down.load(Ordering::SeqCst) {
            return Err(format!("{}: connection refused", url).into());
        }
        Ok(SimulatedConn {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            down: Arc::clone(&self.down),
        })
    }

    async fn ping(&self, _conn: &SimulatedConn) -> Result<(), BoxError> {
        Ok(())
    }

    async fn close(&self, conn: SimulatedConn) {
        info!(conn = conn.id, "Closing connection");
    }
}

/// Queries hang while the database is down, so the pool's timeout fires
fn query(conn: &mut SimulatedConn) -> BoxFuture<'_, Result<usize, BoxError>> {
    Box::pin(async move {
        if conn.down.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(conn.id)
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let options = PoolOptions {
        url: Some("sim://inventory".to_string()),
        pool_size: 3,
        fail_rate: 0.5,
        universe: 4,
        timeout_ms: 50,
        regeneration_cooldown_ms: 500,
        ..PoolOptions::default()
    };

    let db = SimulatedDb::default();
    let pool = Pool::init(options, db.clone()).await?;
    info!(status = %pool.state(), "Pool created");

    for i in 0..3 {
        let conn = pool.execute(query).await?;
        info!("Request #{} served by connection {}", i + 1, conn);
    }

    println!("\n=== OUTAGE ===\n");
    db.down.store(true, Ordering::SeqCst);

    for i in 0..6 {
        match pool.execute(query).await {
            Ok(conn) => info!("Request #{} served by connection {}", i + 1, conn),
            Err(PoolError::Timeout(after)) => warn!("Request #{} timed out after {:?}", i + 1, after),
            Err(e) => warn!("Request #{} rejected: {} (pool {})", i + 1, e, pool.state()),
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    println!("\n=== RECOVERY ===\n");
    db.down.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(600)).await;

    for i in 0..5 {
        match pool.execute(query).await {
            Ok(conn) => info!("Request #{} served by connection {}", i + 1, conn),
            Err(e) => warn!("Request #{} rejected: {} (pool {})", i + 1, e, pool.state()),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!("\n=== FINAL STATISTICS ===\n");
    println!("{}", serde_json::to_string_pretty(&pool.stats().await)?);

    pool.close().await;
    Ok(())
}
