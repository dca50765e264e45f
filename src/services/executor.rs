//! Task executors for dispatch work
//!
//! Dispatch work is handed off the caller's path through `TaskExecutor`.
//! `WorkerPool` runs jobs on a fixed set of tokio workers fed by a bounded
//! mpsc queue; `InlineExecutor` runs them on the calling thread so tests can
//! observe delivery deterministically.

use crate::infra::metrics::Metrics;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A unit of dispatch work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Accepts jobs for execution without blocking the submitter
pub trait TaskExecutor: Send + Sync {
    /// Submit a job. Returns false if the job was rejected.
    fn execute(&self, job: Job) -> bool;
}

/// Runs every job immediately on the submitting thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, job: Job) -> bool {
        run_job(job, 0);
        true
    }
}

/// Run a job, containing any panic to the job itself
fn run_job(job: Job, worker: usize) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(worker = %worker, "dispatch_job_panicked");
    }
}

/// Fixed-size pool of tokio workers sharing a bounded job queue
pub struct WorkerPool {
    /// Job queue sender; taken on shutdown to close the queue
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    /// Worker task handles, joined on shutdown
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Queue capacity (for depth sampling)
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl WorkerPool {
    /// Spawn `workers` workers on the current tokio runtime
    ///
    /// Must be called from within a runtime.
    pub fn new(workers: usize, queue_size: usize, metrics: Arc<Metrics>) -> Self {
        let workers = workers.max(1);
        let capacity = queue_size.max(1);
        let (tx, rx) = mpsc::channel::<Job>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers)
            .map(|worker| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    debug!(worker = %worker, "dispatch_worker_started");
                    loop {
                        // Only the lock holder waits on the queue; the job runs unlocked
                        let job = { rx.lock().await.recv().await };
                        match job {
                            Some(job) => run_job(job, worker),
                            None => break,
                        }
                    }
                    debug!(worker = %worker, "dispatch_worker_stopped");
                })
            })
            .collect();

        info!(workers = %workers, queue_size = %capacity, "worker_pool_started");

        Self { tx: Mutex::new(Some(tx)), workers: Mutex::new(handles), capacity, metrics }
    }

    /// Jobs currently waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.tx.lock().as_ref().map_or(0, |tx| self.capacity - tx.capacity())
    }

    /// Close the queue, let workers drain what is already queued, and join them
    pub async fn shutdown(&self) {
        let closed = self.tx.lock().take();
        drop(closed);

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch_worker_join_failed");
            }
        }
        info!("worker_pool_stopped");
    }
}

impl TaskExecutor for WorkerPool {
    fn execute(&self, job: Job) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            warn!("dispatch_after_shutdown");
            return false;
        };

        let accepted = match tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(queue_size = %self.capacity, "dispatch_queue_full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        };
        let depth = self.capacity - tx.capacity();
        drop(guard);

        self.metrics.set_dispatch_queue_depth(depth as u64);
        accepted
    }
}
