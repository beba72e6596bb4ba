//! Bounded worker pool for blocking runtime calls.
//!
//! Each call holds one worker slot for its whole duration. There is no
//! timeout and no cancellation: a call that never returns keeps its slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKERS: usize = 10;

/// What happens to calls that arrive while every worker is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Wait for a free worker, however many calls are already waiting.
    /// A stuck engine makes this queue grow without limit.
    Unbounded,
    /// Allow at most this many waiting calls; reject the rest.
    Bounded(usize),
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub workers: usize,
    pub queue: QueuePolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue: QueuePolicy::Unbounded,
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Worker pool saturated: {pending} calls pending, limit {limit}")]
    Saturated { pending: usize, limit: usize },
    #[error("Worker pool is closed")]
    Closed,
    #[error("Blocking call panicked: {0}")]
    WorkerPanicked(String),
}

struct Inner {
    slots: Arc<Semaphore>,
    pending: AtomicUsize,
    workers: usize,
    queue: QueuePolicy,
}

/// Runs blocking closures on tokio's blocking threads, at most `workers` at a time.
#[derive(Clone)]
pub struct BlockingBridge {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BlockingBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingBridge")
            .field("workers", &self.inner.workers)
            .field("queue", &self.inner.queue)
            .field("pending", &self.pending())
            .finish()
    }
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BlockingBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let workers = config.workers.max(1);
        info!(workers, queue = ?config.queue, "Blocking bridge initialized");
        Self {
            inner: Arc::new(Inner {
                slots: Arc::new(Semaphore::new(workers)),
                pending: AtomicUsize::new(0),
                workers,
                queue: config.queue,
            }),
        }
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Calls that are running or waiting for a worker.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn idle_workers(&self) -> usize {
        self.inner.slots.available_permits()
    }

    /// Run `op` on a worker and wait for its result.
    ///
    /// Only the calling task is suspended; the executor keeps serving others.
    pub async fn run<F, T>(&self, op: F) -> Result<T, BridgeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let pending = self.inner.pending.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = PendingGuard(&self.inner.pending);

        if let QueuePolicy::Bounded(queue) = self.inner.queue {
            let limit = self.inner.workers + queue;
            if pending > limit {
                warn!(pending, limit, "Rejecting blocking call, worker pool saturated");
                return Err(BridgeError::Saturated { pending, limit });
            }
        }

        let permit = self
            .inner
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BridgeError::Closed)?;
        debug!(pending, "Dispatching blocking call");

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            op()
        })
        .await
        .map_err(|e| BridgeError::WorkerPanicked(e.to_string()))
    }

    /// Stop handing out workers. Calls already running finish normally;
    /// waiting and future calls fail with [`BridgeError::Closed`].
    pub fn close(&self) {
        self.inner.slots.close();
        info!("Blocking bridge closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.slots.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_never_exceeds_workers() {
        let bridge = BlockingBridge::new(BridgeConfig {
            workers: 3,
            queue: QueuePolicy::Unbounded,
        });
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..12 {
            let bridge = bridge.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                bridge
                    .run(move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                        i * 2
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        results.sort();
        assert_eq!(results, (0..12).map(|i| i * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(bridge.pending(), 0);
        assert_eq!(bridge.idle_workers(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bounded_queue_rejects_overflow() {
        let bridge = BlockingBridge::new(BridgeConfig {
            workers: 1,
            queue: QueuePolicy::Bounded(0),
        });
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let busy = bridge.clone();
        let first = tokio::spawn(async move {
            busy.run(move || {
                release_rx.recv().ok();
            })
            .await
        });

        while bridge.pending() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let rejected = bridge.run(|| ()).await;
        assert!(matches!(
            rejected,
            Err(BridgeError::Saturated { pending: 2, limit: 1 })
        ));

        release_tx.send(()).unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(bridge.pending(), 0);

        // Capacity is available again
        assert_eq!(bridge.run(|| 5).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_closed_bridge_refuses_work() {
        let bridge = BlockingBridge::new(BridgeConfig::default());
        bridge.close();
        assert!(bridge.is_closed());
        assert!(matches!(bridge.run(|| 1).await, Err(BridgeError::Closed)));
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn test_panicking_call_is_reported() {
        let bridge = BlockingBridge::new(BridgeConfig::default());
        let result = bridge.run(|| -> u8 { panic!("engine exploded") }).await;
        assert!(matches!(result, Err(BridgeError::WorkerPanicked(_))));

        // The slot is returned
        assert_eq!(bridge.idle_workers(), DEFAULT_WORKERS);
        assert_eq!(bridge.run(|| 3).await.unwrap(), 3);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let bridge = BlockingBridge::new(BridgeConfig {
            workers: 0,
            queue: QueuePolicy::Unbounded,
        });
        assert_eq!(bridge.workers(), 1);
    }
}
