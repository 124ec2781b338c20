//! Concurrency gate — global admission control for task execution.
//!
//! Waiting dispatches queue FIFO on a semaphore, so a freed slot goes to the
//! next waiter immediately. Arrival order decides who gets a slot; task
//! priority does not.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use gramdeck_core::error::{GramdeckError, Result};

/// Slot accounting shared by every dispatch of one scheduler.
#[derive(Debug)]
pub struct ConcurrencyGate {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    waiting: AtomicUsize,
}

/// A held execution slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

/// Decrements the waiter count even when the acquiring future is dropped.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    /// Create a gate with `max_concurrent` slots (at least one).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot. Fails once the gate is closed.
    pub async fn acquire(&self) -> Result<SlotPermit> {
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(SlotPermit { _permit: permit });
        }

        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaitingGuard(&self.waiting);
        tracing::debug!(
            "⏳ Gate full ({}/{}), queueing dispatch",
            self.active(),
            self.max_concurrent
        );
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GramdeckError::Scheduler("concurrency gate closed".into()))?;
        Ok(SlotPermit { _permit: permit })
    }

    /// Stop admitting. Pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn active(&self) -> usize {
        self.max_concurrent - self.slots.available_permits().min(self.max_concurrent)
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_limit() {
        let gate = ConcurrencyGate::new(2);
        let a = gate.acquire().await.unwrap();
        let _b = gate.acquire().await.unwrap();
        assert_eq!(gate.active(), 2);

        // Third acquire must wait until a slot frees
        let third = tokio::time::timeout(Duration::from_millis(20), gate.acquire()).await;
        assert!(third.is_err());
        assert_eq!(gate.waiting(), 0);

        drop(a);
        let _c = gate.acquire().await.unwrap();
        assert_eq!(gate.active(), 2);
    }

    #[tokio::test]
    async fn test_waiter_picks_up_freed_slot() {
        let gate = Arc::new(ConcurrencyGate::new(1));
        let held = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };
        for _ in 0..10 {
            if gate.waiting() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(gate.waiting(), 1);

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(gate.waiting(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_waiters() {
        let gate = ConcurrencyGate::new(1);
        let _held = gate.acquire().await.unwrap();
        gate.close();
        assert!(gate.acquire().await.is_err());
    }

    #[test]
    fn test_zero_is_clamped() {
        assert_eq!(ConcurrencyGate::new(0).max_concurrent(), 1);
    }
}
