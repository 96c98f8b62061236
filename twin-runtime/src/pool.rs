//! Bounded pool for actor loops
//!
//! Tasks are spawned immediately and wait for a permit before running, so a
//! caller that is itself a pooled loop never blocks on submission.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Loops currently holding a permit
    pub fn running(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    pub fn submit<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_or(task, || warn!("worker pool closed; task dropped"))
    }

    /// Like [`submit`](Self::submit), running `on_closed` instead of `task`
    /// once the pool is closed.
    pub fn submit_or<F, R>(&self, task: F, on_closed: R) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
        R: FnOnce() + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                on_closed();
                return;
            };
            task.await;
        })
    }

    /// Stop admitting queued tasks
    pub fn close(&self) {
        self.permits.close();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("running", &self.running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_bounds_concurrency() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test]
    async fn test_closed_pool_drops_tasks() {
        let pool = WorkerPool::new(1);
        pool.close();
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        pool.submit(async move {
            flag.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_runs_rejection() {
        let pool = WorkerPool::new(1);
        pool.close();
        let rejected = Arc::new(AtomicUsize::new(0));
        let flag = rejected.clone();
        pool.submit_or(async {}, move || {
            flag.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
    }
}
