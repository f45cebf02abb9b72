use anyhow::Result;
use futures::future::BoxFuture;
use std::time::{Duration, Instant};
use tokio_postgres::Client;

use crate::config::PoolOptions;
use crate::pool::{Pool, PoolStats};
use crate::postgres::PgProvider;

fn select_one(client: &mut Client) -> BoxFuture<'_, Result<(), tokio_postgres::Error>> {
    Box::pin(async move { client.simple_query("SELECT 1").await.map(|_| ()) })
}

fn print_stats(stats: &PoolStats) {
    println!("Status:                {}", stats.status);
    println!("Pool size:             {}", stats.size);
    println!("Idle slots:            {}", stats.idle);
    println!("Checked out:           {}", stats.checked_out);
    println!("Empty slots:           {}", stats.empty_slots);
    println!("Connect failures:      {}", stats.failures);
    println!("Regeneration attempts: {}", stats.regeneration_attempts);
    println!(
        "Breaker:               {} ({} ok / {} failed, {:.0}% errors, tripped {} times)",
        if stats.breaker.tripped { "tripped" } else { "closed" },
        stats.breaker.successes,
        stats.breaker.failures,
        stats.breaker.error_rate * 100.0,
        stats.breaker.trip_count,
    );
}

/// Check command - initialize a pool and report its state
pub async fn cmd_check(options: PoolOptions, json: bool) -> Result<()> {
    let (pool, init_error) = match Pool::init(options, PgProvider).await {
        Ok(pool) => (pool, None),
        Err(err) => (err.pool, Some(err.error)),
    };

    let stats = pool.stats().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        let config = pool.config();
        println!(
            "Target:                {}",
            if pool.url().is_some() { "configured" } else { "missing" }
        );
        println!(
            "Breaker threshold:     {:.0}% over {} samples",
            config.fail_rate * 100.0,
            config.universe
        );
        println!("Call timeout:          {:?}", config.timeout);
        println!("Regeneration cooldown: {:?}", config.regeneration_cooldown);
        print_stats(&stats);
    }

    pool.close().await;

    if let Some(error) = init_error {
        anyhow::bail!("Pool initialization failed: {}", error);
    }

    Ok(())
}

/// Ping command - run `SELECT 1` through the pool
pub async fn cmd_ping(options: PoolOptions, count: usize) -> Result<()> {
    let pool = crate::cli::open_pool(options).await;
    let mut failed = 0;

    for attempt in 1..=count {
        let start = Instant::now();
        match pool.execute(select_one).await {
            Ok(()) => println!(
                "ping {}: ok ({:.2}ms)",
                attempt,
                start.elapsed().as_secs_f64() * 1000.0
            ),
            Err(e) => {
                failed += 1;
                println!("ping {}: {} [pool {}]", attempt, e, pool.state());
            }
        }
    }

    pool.close().await;

    if failed > 0 {
        anyhow::bail!("{} of {} pings failed", failed, count);
    }

    Ok(())
}

/// Watch command - ping on an interval and print status transitions
///
/// Runs until `iterations` pings were sent (0 = forever) or Ctrl-C.
pub async fn cmd_watch(options: PoolOptions, interval_ms: u64, iterations: u64) -> Result<()> {
    let pool = crate::cli::open_pool(options).await;
    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut last_status = pool.state();
    let mut sent = 0u64;

    println!("[{:>8.1}s] pool {}", 0.0, last_status);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let outcome = pool.execute(select_one).await;
        sent += 1;

        let status = pool.state();
        if status != last_status {
            println!(
                "[{:>8.1}s] pool {} -> {}",
                started.elapsed().as_secs_f64(),
                last_status,
                status
            );
            last_status = status;
        }

        if let Err(e) = outcome {
            println!("[{:>8.1}s] ping failed: {}", started.elapsed().as_secs_f64(), e);
        }

        if iterations > 0 && sent >= iterations {
            break;
        }
    }

    print_stats(&pool.stats().await);
    pool.close().await;

    Ok(())
}
