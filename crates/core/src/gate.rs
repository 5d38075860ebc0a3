//! Concurrency gate bounding in-flight job pipelines.
//!
//! A FIFO-fair counting semaphore shared by handle. Every pipeline acquires
//! one permit before submission and gives it back when it reaches a terminal
//! state. Waiting is cancellable and never consumes a permit.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::metrics;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("Gate acquisition cancelled")]
    Cancelled,

    #[error("Gate is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct GateStats {
    in_use: AtomicUsize,
    waiting: AtomicUsize,
    peak: AtomicUsize,
}

/// Snapshot of gate usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStatus {
    pub capacity: usize,
    pub in_use: usize,
    pub waiting: usize,
    /// Highest `in_use` seen since creation.
    pub peak: usize,
}

/// Shared permit pool. Cloning yields another handle to the same pool.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<GateStats>,
}

impl ConcurrencyGate {
    /// Creates a gate with `capacity` permits (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            stats: Arc::new(GateStats::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits for a permit in arrival order.
    ///
    /// Returns [`GateError::Cancelled`] without taking a permit if `cancel`
    /// fires first, including when it is already cancelled on entry.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit, GateError> {
        if cancel.is_cancelled() {
            return Err(GateError::Cancelled);
        }

        let started = Instant::now();
        let _waiting = WaitingGuard::enter(&self.stats);

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GateError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| GateError::Closed)?
            }
        };

        metrics::GATE_WAIT.observe(started.elapsed().as_secs_f64());
        let in_use = self.stats.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(in_use, Ordering::SeqCst);

        Ok(GatePermit {
            permit: Some(permit),
            stats: Arc::clone(&self.stats),
        })
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            capacity: self.capacity,
            in_use: self.stats.in_use.load(Ordering::SeqCst),
            waiting: self.stats.waiting.load(Ordering::SeqCst),
            peak: self.stats.peak.load(Ordering::SeqCst),
        }
    }
}

/// Decrements the waiting count even if the acquire future is dropped.
struct WaitingGuard<'a>(&'a GateStats);

impl<'a> WaitingGuard<'a> {
    fn enter(stats: &'a GateStats) -> Self {
        stats.waiting.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A held gate slot. Released on [`GatePermit::release`] or drop.
#[derive(Debug)]
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    stats: Arc<GateStats>,
}

impl GatePermit {
    /// Returns the slot to the gate. Further calls are no-ops.
    pub fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.stats.in_use.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        }
    }

    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let gate = ConcurrencyGate::new(2);
        let cancel = CancellationToken::new();

        let mut a = gate.acquire(&cancel).await.unwrap();
        let _b = gate.acquire(&cancel).await.unwrap();
        assert_eq!(gate.status().in_use, 2);

        a.release();
        a.release();
        assert!(!a.is_held());
        assert_eq!(gate.status().in_use, 1);
        assert_eq!(gate.status().peak, 2);
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let gate = ConcurrencyGate::new(1);
        let cancel = CancellationToken::new();
        {
            let _permit = gate.acquire(&cancel).await.unwrap();
            assert_eq!(gate.status().in_use, 1);
        }
        assert_eq!(gate.status().in_use, 0);
        assert!(gate.acquire(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let gate = ConcurrencyGate::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(gate.acquire(&cancel).await.unwrap_err(), GateError::Cancelled);
        assert_eq!(gate.status().in_use, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_consumes_nothing() {
        let gate = ConcurrencyGate::new(1);
        let holder = gate.acquire(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.acquire(&cancel).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(gate.status().waiting, 1);

        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Err(GateError::Cancelled));
        assert_eq!(gate.status().waiting, 0);

        drop(holder);
        let status = gate.status();
        assert_eq!(status.in_use, 0);
        // The full capacity is still available.
        let _again = gate.acquire(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_resume_in_arrival_order() {
        let gate = ConcurrencyGate::new(1);
        let first = gate.acquire(&CancellationToken::new()).await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for id in 0..3 {
            let gate = gate.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _permit = gate.acquire(&CancellationToken::new()).await.unwrap();
                tx.send(id).unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            });
            // Make arrival order deterministic.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        drop(first);
        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rx.recv().await.unwrap());
        }
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(gate.status().peak, 1);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        assert_eq!(ConcurrencyGate::new(0).capacity(), 1);
    }
}
