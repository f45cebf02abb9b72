//! Bounded slot queue backing the pool
//!
//! A slot is either a live connection or `None`, which stands for a
//! connection attempt that failed while the pool was being populated. Empty
//! slots circulate like connections so the pool keeps its configured size.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

const MAX_PREALLOCATED: usize = 64;

/// A connection or the placeholder for one that could not be opened
pub type Slot<C> = Option<C>;

/// Returned by [`SlotStore::take`] once the store has been retired
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slot store has been retired")]
pub struct StoreRetired;

struct Slots<C> {
    queue: VecDeque<Slot<C>>,
    retired: bool,
}

/// Fixed-capacity queue of slots
///
/// `take` waits until a slot is available; `put` never waits. Once retired
/// the store rejects returned slots and wakes every waiter with an error.
pub struct SlotStore<C> {
    slots: Mutex<Slots<C>>,
    /// One permit per queued slot
    available: Semaphore,
    /// Slots handed out by `take` and not yet put back
    checked_out: AtomicUsize,
    capacity: usize,
}

impl<C> SlotStore<C> {
    /// Create an empty store holding at most `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                queue: VecDeque::with_capacity(capacity.min(MAX_PREALLOCATED)),
                retired: false,
            }),
            available: Semaphore::new(0),
            checked_out: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Take the next slot, waiting until one is available
    pub async fn take(&self) -> Result<Slot<C>, StoreRetired> {
        let permit = self.available.acquire().await.map_err(|_| StoreRetired)?;
        permit.forget();

        // A permit can race with `retire` draining the queue
        let slot = self.slots.lock().queue.pop_front().ok_or(StoreRetired)?;
        self.checked_out.fetch_add(1, Ordering::Relaxed);
        Ok(slot)
    }

    /// Put a slot back, handing it back to the caller if the store is retired
    pub fn put(&self, slot: Slot<C>) -> Result<(), Slot<C>> {
        let _ = self
            .checked_out
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        {
            let mut slots = self.slots.lock();
            if slots.retired {
                return Err(slot);
            }
            debug_assert!(slots.queue.len() < self.capacity, "slot store over capacity");
            slots.queue.push_back(slot);
        }
        self.available.add_permits(1);
        Ok(())
    }

    /// Retire the store and hand back every idle connection
    ///
    /// Retiring twice returns nothing the second time.
    pub fn retire(&self) -> Vec<C> {
        let drained: Vec<Slot<C>> = {
            let mut slots = self.slots.lock();
            slots.retired = true;
            slots.queue.drain(..).collect()
        };
        self.available.close();
        drained.into_iter().flatten().collect()
    }

    /// Whether the store has been retired
    pub fn is_retired(&self) -> bool {
        self.slots.lock().retired
    }

    /// Number of slots currently queued
    pub fn idle(&self) -> usize {
        self.slots.lock().queue.len()
    }

    /// Number of queued slots without a connection
    pub fn empty_slots(&self) -> usize {
        self.slots.lock().queue.iter().filter(|slot| slot.is_none()).count()
    }

    /// Number of slots currently borrowed
    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::Relaxed)
    }

    /// Maximum number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
