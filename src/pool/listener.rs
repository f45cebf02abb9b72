//! Pool status and the task that keeps it in sync with the breaker

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::circuit::BreakerEvent;

/// Externally visible pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PoolStatus {
    /// Connections are being served
    Ready = 0,

    /// The breaker was reset and the pool is being rebuilt
    Regenerating = 1,

    /// The breaker tripped; the pool waits for its cooldown
    Failed = 2,
}

impl PoolStatus {
    /// Get a human-readable status name
    pub fn name(&self) -> &str {
        match self {
            PoolStatus::Ready => "ready",
            PoolStatus::Regenerating => "regenerating",
            PoolStatus::Failed => "failed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoolStatus::Ready,
            1 => PoolStatus::Regenerating,
            _ => PoolStatus::Failed,
        }
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared, lock-free holder for the pool status
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: PoolStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn get(&self) -> PoolStatus {
        PoolStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: PoolStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Apply one breaker event to the status
pub fn apply(event: BreakerEvent, status: &StatusCell) {
    debug!(event = event.name(), "Breaker event");

    let next = match event {
        BreakerEvent::Tripped => PoolStatus::Failed,
        BreakerEvent::Reset => PoolStatus::Regenerating,
        BreakerEvent::Ready => PoolStatus::Ready,
        BreakerEvent::Fail => return,
    };

    let previous = status.get();
    status.set(next);
    if previous != next {
        match next {
            PoolStatus::Failed => warn!(from = %previous, to = %next, "Pool status changed"),
            _ => info!(from = %previous, to = %next, "Pool status changed"),
        }
    }
}

/// Start the listener task
///
/// The task runs until the breaker, and with it every sender, is dropped.
pub fn spawn(
    mut events: mpsc::UnboundedReceiver<BreakerEvent>,
    status: Arc<StatusCell>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            apply(event, &status);
        }
        debug!("Breaker event stream closed, state listener exiting");
    })
}
