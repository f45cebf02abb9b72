//! Integration tests for the pool and its circuit breaker
//!
//! These tests drive the public API end to end with an in-memory provider
//! whose health can be flipped while the pool is running.

use async_trait::async_trait;
use futures::future::BoxFuture;
use pgbreaker::pool::{BoxError, ConnectionProvider, Pool, PoolError, PoolStatus};
use pgbreaker::PoolOptions;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
struct FlakyProvider {
    healthy: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl FlakyProvider {
    fn new(healthy: bool) -> Self {
        let provider = Self::default();
        provider.healthy.store(healthy, Ordering::SeqCst);
        provider
    }
}

struct Session {
    queries: usize,
}

#[async_trait]
impl ConnectionProvider for FlakyProvider {
    type Connection = Session;

    async fn open(&self, url: &str) -> Result<Session, BoxError> {
        assert_eq!(url, "mock://orders");
        if !self.healthy.load(Ordering::SeqCst) {
            return Err("could not connect to server".into());
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Session { queries: 0 })
    }

    async fn ping(&self, _session: &Session) -> Result<(), BoxError> {
        Ok(())
    }

    async fn close(&self, _session: Session) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn options(pool_size: i64, fail_rate: f64, universe: i64) -> PoolOptions {
    PoolOptions {
        url: Some("mock://orders".to_string()),
        pool_size,
        fail_rate,
        universe,
        timeout_ms: 1_000,
        regeneration_cooldown_ms: 50,
        ..PoolOptions::default()
    }
}

fn query(session: &mut Session) -> BoxFuture<'_, Result<usize, BoxError>> {
    Box::pin(async move {
        session.queries += 1;
        Ok(session.queries)
    })
}

async fn wait_for(pool: &Pool<FlakyProvider>, status: PoolStatus) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while pool.state() != status {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("pool never became {}", status));
}

#[tokio::test]
async fn test_unreachable_database_fails_init() {
    let provider = FlakyProvider::new(false);

    let err = Pool::init(options(3, 1.0, 3), provider.clone())
        .await
        .unwrap_err();

    assert!(matches!(err.error, PoolError::PoolCreationFailed));
    assert_eq!(err.to_string(), "Failed to create connection pool");

    let pool = err.into_pool();
    assert_eq!(pool.state(), PoolStatus::Failed);
    assert_eq!(provider.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_healthy_pool_serves_callers() {
    let provider = FlakyProvider::new(true);
    let pool = Pool::init(options(2, 0.5, 2), provider.clone()).await.unwrap();

    assert_eq!(pool.state(), PoolStatus::Ready);
    assert_eq!(pool.url(), Some("mock://orders"));

    assert_eq!(pool.execute(query).await.unwrap(), 1);
    assert_eq!(pool.execute(query).await.unwrap(), 1);
    // FIFO: the first session comes around again
    assert_eq!(pool.execute(query).await.unwrap(), 2);

    pool.close().await;
    assert_eq!(provider.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_callers_block_until_a_slot_is_free() {
    let pool = Pool::init(options(1, 0.5, 1), FlakyProvider::new(true))
        .await
        .unwrap();

    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let holder = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.execute(move |_session| {
                Box::pin(async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, BoxError>(())
                })
            })
            .await
        })
    };
    started_rx.await.unwrap();

    let waiting = tokio::time::timeout(Duration::from_millis(30), pool.execute(query)).await;
    assert!(waiting.is_err(), "second caller should wait for the slot");

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();

    assert_eq!(pool.execute(query).await.unwrap(), 1);
}

#[tokio::test]
async fn test_pool_recovers_after_outage() {
    let provider = FlakyProvider::new(false);
    let pool = Pool::init(options(2, 1.0, 2), provider.clone())
        .await
        .unwrap_err()
        .into_pool();

    // Still down: regeneration fails and the pool stays failed
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(matches!(
        pool.execute(query).await,
        Err(PoolError::ServiceUnavailable)
    ));
    wait_for(&pool, PoolStatus::Failed).await;
    assert_eq!(pool.stats().await.regeneration_attempts, 1);

    provider.healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(matches!(
        pool.execute(query).await,
        Err(PoolError::ServiceUnavailable)
    ));

    wait_for(&pool, PoolStatus::Ready).await;
    assert_eq!(pool.execute(query).await.unwrap(), 1);

    let stats = pool.stats().await;
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.empty_slots, 0);
    assert_eq!(stats.regeneration_attempts, 0);
    assert_eq!(stats.breaker.trip_count, 2);
}

#[tokio::test]
async fn test_callback_errors_do_not_trip_breaker() {
    let pool = Pool::init(options(1, 0.5, 1), FlakyProvider::new(true))
        .await
        .unwrap();

    for _ in 0..5 {
        let result: Result<(), PoolError> = pool
            .execute(|_session| Box::pin(async { Err::<(), BoxError>("syntax error".into()) }))
            .await;
        match result {
            Err(PoolError::Callback(error)) => assert_eq!(error.to_string(), "syntax error"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    assert_eq!(pool.state(), PoolStatus::Ready);
    assert!(!pool.stats().await.breaker.tripped);
}
