use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

/// Bounded pool for blocking backend calls.
///
/// Jobs run on tokio's blocking threads; a semaphore caps how many run at
/// once. A job that outlives the timeout keeps its permit until it returns.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    Timeout(Duration),
    Closed,
}

impl WorkerPool {
    pub fn new(size: usize, timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` off the async threads. Panics inside the job are resumed on
    /// the caller.
    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });
        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(PoolError::Timeout(self.timeout)),
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Ok(Err(_)) => Err(PoolError::Closed),
        }
    }

    /// Refuse new jobs. Jobs already running finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}
