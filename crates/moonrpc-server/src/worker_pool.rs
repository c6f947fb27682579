use moonrpc_common::protocol::error::{MoonrpcError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::WorkerPoolConfig;

/// Bounded pool that runs business code off the network tasks.
///
/// Two semaphores bound the pool: `admission` caps the requests the pool
/// holds at once (`max_workers + queue_capacity`) and `workers` caps the
/// ones executing. Admission never waits: when it is exhausted
/// [`try_submit`](Self::try_submit) fails immediately with
/// [`MoonrpcError::ServerBusy`], so a connection task is never blocked by a
/// saturated pool.
///
/// Jobs run on tokio's blocking thread pool, since provider code is plain
/// synchronous code that may block.
pub struct WorkerPool {
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    config: WorkerPoolConfig,
    rejected: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Result<Self> {
        config.validate().map_err(MoonrpcError::Config)?;
        Ok(Self {
            admission: Arc::new(Semaphore::new(config.capacity())),
            workers: Arc::new(Semaphore::new(config.max_workers)),
            config,
            rejected: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Admits `job` or rejects it without waiting.
    ///
    /// On success the returned future runs the job once polled and resolves
    /// with its output; the admission slot is held until then. A job that
    /// panics resolves to a framework error.
    pub fn try_submit<F, R>(&self, job: F) -> Result<impl Future<Output = Result<R>> + Send + 'static>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let admitted = match self.admission.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(MoonrpcError::ServerBusy(
                    "process thread pool is full, reject".to_string(),
                ));
            }
        };
        let workers = self.workers.clone();

        Ok(async move {
            let _admitted = admitted;
            let _worker = workers
                .acquire_owned()
                .await
                .map_err(|_| MoonrpcError::Closed("worker pool shut down".to_string()))?;
            tokio::task::spawn_blocking(job)
                .await
                .map_err(|e| MoonrpcError::Remote(format!("provider call process error: {}", e)))
        })
    }

    /// Jobs currently executing.
    pub fn active(&self) -> usize {
        self.config.max_workers - self.workers.available_permits()
    }

    /// Jobs admitted and not yet finished, executing or waiting.
    pub fn in_flight(&self) -> usize {
        self.config.capacity() - self.admission.available_permits()
    }

    /// Submissions rejected since the pool was created.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Stops admitting jobs; queued jobs waiting for a worker fail with
    /// [`MoonrpcError::Closed`].
    pub fn shutdown(&self) {
        self.admission.close();
        self.workers.close();
    }
}
