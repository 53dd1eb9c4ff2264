//! Global concurrency gate for swarm/pipeline workers.
//!
//! A FIFO counting semaphore bounds how many sandboxes run at once across an
//! entire swarm operation, independent of how many logical items the
//! operation has queued. Permits are acquired before a worker's sandbox boots
//! and released when the worker's session is torn down, so the limit tracks
//! live sandboxes rather than in-flight futures.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::domain::errors::{RuntimeError, RuntimeResult};

/// Cloneable handle around a bounded pool of sandbox slots.
#[derive(Clone)]
pub struct ConcurrencyGate {
    inner: Arc<Semaphore>,
}

impl ConcurrencyGate {
    pub fn new(max_concurrency: usize) -> Self {
        Self { inner: Arc::new(Semaphore::new(max_concurrency.max(1))) }
    }

    /// Blocks until a slot is free. The returned permit releases the slot on
    /// drop, so callers hold it for the lifetime of one worker's sandbox.
    pub async fn acquire(&self) -> RuntimeResult<SemaphorePermit<'_>> {
        self.inner
            .acquire()
            .await
            .map_err(|_| RuntimeError::Execution("concurrency gate closed".to_string()))
    }

    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn bounds_concurrent_holders() {
        let gate = ConcurrencyGate::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn zero_requested_concurrency_is_clamped_to_one() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.available_permits(), 1);
    }

    /// However many slots a gate is built with, and however many workers
    /// race for them, the number of simultaneous holders never exceeds it.
    #[test_strategy::proptest]
    fn bounds_concurrent_holders_for_any_capacity(#[strategy(1usize..6)] capacity: usize, #[strategy(1usize..16)] workers: usize) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let gate = ConcurrencyGate::new(capacity);
            let in_flight = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));

            let mut handles = Vec::new();
            for _ in 0..workers {
                let gate = gate.clone();
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = gate.acquire().await.unwrap();
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }));
            }
            for h in handles {
                h.await.unwrap();
            }
            prop_assert!(peak.load(Ordering::SeqCst) <= capacity);
            Ok(())
        })?;
    }
}
