//! Bounded task pool.
//!
//! `go` waits for a free slot before spawning, so at most `limit` tasks run
//! at once; `wait` joins every spawned task.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Errors reported by [`BoundedPool::wait`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("{count} pool task(s) panicked")]
    TaskPanicked { count: usize },
}

/// Runs futures on the tokio runtime with a concurrency ceiling.
pub struct BoundedPool {
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    limit: usize,
}

impl BoundedPool {
    /// Creates a pool running at most `limit` tasks. A limit of zero is raised to one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            tasks: JoinSet::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Spawns `task` once a slot is free.
    pub async fn go<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The semaphore is never closed.
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return;
        };
        self.tasks.spawn(async move {
            let _permit = permit;
            task.await;
        });
    }

    /// Waits for every spawned task.
    pub async fn wait(mut self) -> Result<(), PoolError> {
        let mut panicked = 0;
        while let Some(joined) = self.tasks.join_next().await {
            if joined.is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(PoolError::TaskPanicked { count: panicked });
        }
        Ok(())
    }
}
