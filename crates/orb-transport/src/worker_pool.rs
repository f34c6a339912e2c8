//! Bounded pool for event handlers and server-side dispatch

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct WorkerPoolStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
}

/// Runs submitted futures as tokio tasks, at most `size` at a time.
///
/// Only running jobs are bounded. Jobs submitted past `size` wait for a
/// permit with no limit on how many may wait; see [`WorkerPool::queued`].
#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    stats: Arc<WorkerPoolStats>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
            waiting: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(WorkerPoolStats::default()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently running a job
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Jobs submitted but still waiting for a worker
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &Arc<WorkerPoolStats> {
        &self.stats
    }

    pub fn spawn<F>(&self, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let waiting = self.waiting.clone();
        let stats = self.stats.clone();
        stats.submitted.fetch_add(1, Ordering::Relaxed);
        waiting.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            let permit = permits.acquire_owned().await;
            waiting.fetch_sub(1, Ordering::AcqRel);
            let Ok(_permit) = permit else {
                return;
            };
            job.await;
            stats.completed.fetch_add(1, Ordering::Relaxed);
        })
    }
}
