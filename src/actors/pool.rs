//! Worker pool - bounded concurrency for probe batches
//!
//! A fixed number of workers pull jobs from a bounded queue. Submission never
//! waits: when the queue is full the job is rejected and the scheduler skips
//! that target for the current tick.
//!
//! ```text
//! Scheduler ──try_submit──▶ [queue, capacity = size] ──▶ worker-1..N ──▶ JobHandler
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, Timelike};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::TargetConfig;
use crate::alerts::record_call;
use crate::monitors::probe::ProbeExecutor;
use crate::storage::StorageBackend;

/// One probe batch for one target
#[derive(Debug, Clone)]
pub struct ProbeJob {
    pub target: TargetConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// A pool needs at least one worker
    InvalidSize,

    /// Every worker is busy and the queue is full
    Saturated,

    /// The pool no longer accepts work
    Closed,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::InvalidSize => write!(f, "worker pool size must be at least 1"),
            PoolError::Saturated => write!(f, "worker pool is saturated"),
            PoolError::Closed => write!(f, "worker pool is shut down"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Work executed by a pool worker
///
/// A job that has started always runs to completion; shutdown only drops
/// jobs still waiting in the queue.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: ProbeJob);
}

/// Runs `calls_per_batch` sequential probes against a target, persisting
/// each call (and its alert) as soon as it completes.
#[derive(Clone)]
pub struct BatchRunner {
    executor: ProbeExecutor,
    store: Arc<dyn StorageBackend>,
    pause: Duration,
}

impl BatchRunner {
    pub fn new(executor: ProbeExecutor, store: Arc<dyn StorageBackend>, pause: Duration) -> Self {
        Self { executor, store, pause }
    }

    /// Run a batch as if the local hour were `hour`. Returns the number of calls made.
    #[instrument(skip_all, fields(target = %target.name))]
    pub async fn run_in_hour(&self, target: &TargetConfig, hour: u32) -> u32 {
        if !target.in_monitoring_hours(hour) {
            info!(
                "target {} ({}) is outside its monitoring hours ({}), skipping batch",
                target.name, target.id, target.monitoring_hours
            );
            return 0;
        }

        let mut calls = 0;
        for n in 0..target.calls_per_batch {
            let record = self.executor.call(target).await;
            record_call(self.store.as_ref(), target, &record).await;
            calls += 1;

            info!(
                "call {}/{} to {}: status {}, {:.3}s",
                n + 1,
                target.calls_per_batch,
                target.name,
                record.status_code(),
                record.elapsed_secs
            );

            if n + 1 < target.calls_per_batch {
                tokio::time::sleep(self.pause).await;
            }
        }

        calls
    }
}

#[async_trait]
impl JobHandler for BatchRunner {
    async fn handle(&self, job: ProbeJob) {
        let hour = Local::now().hour();
        self.run_in_hour(&job.target, hour).await;
    }
}

/// Fixed-size pool of batch workers
pub struct WorkerPool {
    job_tx: mpsc::Sender<ProbeJob>,
    shutdown_tx: watch::Sender<bool>,
    workers: JoinSet<()>,
    live: Arc<AtomicUsize>,
    size: usize,
}

impl WorkerPool {
    pub fn spawn(size: usize, handler: Arc<dyn JobHandler>) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidSize);
        }

        let (job_tx, job_rx) = mpsc::channel(size);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let live = Arc::new(AtomicUsize::new(size));

        let mut workers = JoinSet::new();
        for worker_id in 0..size {
            workers.spawn(worker_loop(
                worker_id,
                job_rx.clone(),
                handler.clone(),
                shutdown_rx.clone(),
                LiveWorker(live.clone()),
            ));
        }

        debug!("spawned worker pool with {size} workers");

        Ok(Self {
            job_tx,
            shutdown_tx,
            workers,
            live,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job without waiting.
    pub fn try_submit(&self, job: ProbeJob) -> Result<(), PoolError> {
        self.job_tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::Saturated,
            mpsc::error::TrySendError::Closed(_) => PoolError::Closed,
        })
    }

    /// Workers that have not exited (a panicking batch takes its worker with it)
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// A pool is healthy while every worker is alive and receiving jobs.
    pub fn is_healthy(&self) -> bool {
        !self.job_tx.is_closed() && self.live_workers() == self.size
    }

    /// Stop accepting work, drop queued jobs and wait up to `timeout` for
    /// in-flight batches. Workers still busy after that are aborted.
    pub async fn shutdown(self, timeout: Duration) {
        let WorkerPool {
            job_tx,
            shutdown_tx,
            mut workers,
            ..
        } = self;

        let _ = shutdown_tx.send(true);
        drop(job_tx);

        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("worker panicked: {e}");
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} workers still busy after {}s, aborting them",
                workers.len(),
                timeout.as_secs()
            );
            workers.abort_all();
        }

        debug!("worker pool shut down");
    }
}

/// Keeps the pool's live-worker count honest, including when a worker panics
struct LiveWorker(Arc<AtomicUsize>);

impl Drop for LiveWorker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn worker_loop(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<ProbeJob>>>,
    handler: Arc<dyn JobHandler>,
    mut shutdown: watch::Receiver<bool>,
    _live: LiveWorker,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                job = jobs.recv() => job,
            }
        };

        let Some(job) = job else {
            break;
        };

        if *shutdown.borrow() {
            trace!("worker {worker_id} dropping queued job for {}", job.target.name);
            break;
        }

        trace!("worker {worker_id} running batch for {}", job.target.name);
        handler.handle(job).await;
    }

    trace!("worker {worker_id} exiting");
}
