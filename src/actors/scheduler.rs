//! Scheduler loop
//!
//! A single coordinating task that ticks once per second, aligned to whole
//! seconds. Each tick it:
//!
//! 1. kicks off minute aggregation when a minute boundary has passed
//! 2. checks the worker pool and recreates it if it lost workers
//! 3. submits a batch for every target due in this second
//!
//! The loop itself never waits on the network: batches run in the pool and
//! aggregation/cleanup run as background tasks. A tick that fails is logged
//! and counted; once the streak exceeds `failure_threshold` the loop backs off.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, DurationRound, Local, TimeDelta, Timelike, Utc};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use super::aggregator::MinuteAggregator;
use super::pool::{JobHandler, PoolError, ProbeJob, WorkerPool};
use crate::TargetConfig;
use crate::config::Settings;
use crate::monitors::registry::TargetRegistry;
use crate::storage::StorageBackend;

/// Slot holding the session's worker pool, shared with the lifecycle controller
pub type PoolSlot = Arc<Mutex<Option<WorkerPool>>>;

/// Wall-clock source for due seconds, monitoring hours and minute boundaries
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub tick: Duration,

    /// Pause between two calls of the same batch
    pub batch_pause: Duration,

    pub pool_size: usize,

    /// Consecutive failed ticks tolerated before backing off
    pub failure_threshold: u32,
    pub failure_backoff: Duration,

    /// Delete data older than this; `None` keeps everything
    pub retention: Option<TimeDelta>,
    pub cleanup_interval: Duration,

    /// How long `Stop` waits for the loop and then for in-flight batches
    pub stop_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            batch_pause: Duration::from_millis(200),
            pool_size: 10,
            failure_threshold: 5,
            failure_backoff: Duration::from_secs(30),
            retention: Some(TimeDelta::days(30)),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            pool_size: settings.max_workers,
            retention: (settings.data_retention_days > 0)
                .then(|| TimeDelta::days(i64::from(settings.data_retention_days))),
            stop_timeout: settings.stop_timeout(),
            ..Self::default()
        }
    }
}

/// Whether `target` should get a batch at `second` of the minute during `hour`.
///
/// An interval of zero is never due.
pub fn is_due(target: &TargetConfig, second: u32, hour: u32) -> bool {
    target.call_interval > 0 && second % target.call_interval == 0 && target.in_monitoring_hours(hour)
}

/// Start of the minute following `now`
pub fn next_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now);
    truncated + TimeDelta::minutes(1)
}

/// Why a tick could not dispatch its batches
#[derive(Debug)]
enum TickError {
    /// The pool had to be replaced and a new one could not be spawned
    PoolUnavailable(PoolError),

    SlotPoisoned,

    Submit(PoolError),
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickError::PoolUnavailable(e) => write!(f, "could not recreate worker pool: {e}"),
            TickError::SlotPoisoned => write!(f, "worker pool slot poisoned"),
            TickError::Submit(e) => write!(f, "batch submission failed: {e}"),
        }
    }
}

/// Run of consecutive failed ticks
#[derive(Debug)]
struct FailureStreak {
    threshold: u32,
    count: u32,
}

impl FailureStreak {
    fn new(threshold: u32) -> Self {
        Self { threshold, count: 0 }
    }

    /// Count one more failure and return the length of the streak.
    fn record(&mut self) -> u32 {
        self.count += 1;
        self.count
    }

    /// A backoff is due once the streak is longer than the threshold.
    fn exceeded(&self) -> bool {
        self.count > self.threshold
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<TargetRegistry>,
    store: Arc<dyn StorageBackend>,
    handler: Arc<dyn JobHandler>,
    pool: PoolSlot,
    aggregator: MinuteAggregator,
    background: JoinSet<()>,
    clock: Clock,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<TargetRegistry>,
        store: Arc<dyn StorageBackend>,
        handler: Arc<dyn JobHandler>,
        pool: PoolSlot,
    ) -> Self {
        Self {
            config,
            registry,
            aggregator: MinuteAggregator::new(store.clone()),
            store,
            handler,
            pool,
            background: JoinSet::new(),
            clock: Arc::new(Local::now),
        }
    }

    /// Replace the wall clock, e.g. with one driven by tokio's paused time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler loop started");

        let started_at = (self.clock)().with_timezone(&Utc);
        let mut ticker = tokio::time::interval_at(first_tick(started_at), self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cleanup = tokio::time::interval(self.config.cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut next_boundary = next_minute_boundary(started_at);
        let mut last_second: Option<i64> = None;
        let mut failures = FailureStreak::new(self.config.failure_threshold);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                _ = ticker.tick() => {
                    let now = (self.clock)();
                    let second_stamp = now.timestamp();
                    if last_second == Some(second_stamp) {
                        trace!("already dispatched second {second_stamp}");
                        continue;
                    }
                    last_second = Some(second_stamp);

                    match self.tick(now, &mut next_boundary).await {
                        Ok(submitted) => {
                            failures.reset();
                            if submitted > 0 {
                                debug!("submitted {submitted} batches");
                            }
                        }
                        Err(e @ TickError::PoolUnavailable(_)) => {
                            error!("{e}, scheduler exiting");
                            break;
                        }
                        Err(e) => {
                            let streak = failures.record();
                            error!("scheduler tick failed ({streak} in a row): {e}");

                            if failures.exceeded() {
                                warn!(
                                    "{streak} consecutive failures, pausing for {}s",
                                    self.config.failure_backoff.as_secs()
                                );
                                tokio::select! {
                                    _ = tokio::time::sleep(self.config.failure_backoff) => {}
                                    _ = shutdown.changed() => break,
                                }
                                failures.reset();
                            }
                        }
                    }
                }

                _ = cleanup.tick(), if self.config.retention.is_some() => {
                    self.spawn_cleanup();
                }
            }

            while self.background.try_join_next().is_some() {}
        }

        self.background.abort_all();
        info!("scheduler loop stopped");
    }

    /// One pass of the loop body. Returns the number of batches submitted.
    async fn tick(&mut self, now: DateTime<Local>, next_boundary: &mut DateTime<Utc>) -> Result<usize, TickError> {
        let utc_now = now.with_timezone(&Utc);
        if utc_now >= *next_boundary {
            self.spawn_aggregation(utc_now).await;
            *next_boundary = next_minute_boundary(utc_now);
        }

        let (second, hour) = (now.second(), now.hour());
        let due: Vec<TargetConfig> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|t| is_due(t, second, hour))
            .collect();

        let mut slot = self.pool.lock().map_err(|_| TickError::SlotPoisoned)?;
        let pool = self.ensure_pool(&mut slot).map_err(TickError::PoolUnavailable)?;

        let mut submitted = 0;
        for target in due {
            let name = target.name.clone();
            match pool.try_submit(ProbeJob { target }) {
                Ok(()) => submitted += 1,
                Err(PoolError::Saturated) => {
                    warn!("worker pool saturated, skipping {name} this tick");
                }
                Err(e) => return Err(TickError::Submit(e)),
            }
        }

        Ok(submitted)
    }

    /// Hand out a healthy pool, replacing one that lost workers.
    ///
    /// The replaced pool drains in the background: its queued jobs are
    /// dropped, batches already running finish.
    fn ensure_pool<'a>(&self, slot: &'a mut Option<WorkerPool>) -> Result<&'a WorkerPool, PoolError> {
        if !slot.as_ref().is_some_and(WorkerPool::is_healthy) {
            let pool = WorkerPool::spawn(self.config.pool_size, self.handler.clone())?;

            if let Some(old) = slot.replace(pool) {
                warn!(
                    "worker pool lost workers ({}/{} alive), replaced it",
                    old.live_workers(),
                    old.size()
                );
                tokio::spawn(old.shutdown(self.config.stop_timeout));
            } else {
                debug!("created worker pool");
            }
        }

        slot.as_ref().ok_or(PoolError::Closed)
    }

    async fn spawn_aggregation(&mut self, now: DateTime<Utc>) {
        let targets = self.registry.snapshot().await;
        let aggregator = self.aggregator.clone();

        trace!("minute boundary passed, aggregating {} targets", targets.len());
        self.background.spawn(async move {
            let written = aggregator.aggregate_all(&targets, now).await;
            debug!("minute aggregation wrote {written} rows");
        });
    }

    fn spawn_cleanup(&mut self) {
        let Some(retention) = self.config.retention else {
            return;
        };
        let store = self.store.clone();

        self.background.spawn(async move {
            let before = Utc::now() - retention;
            match store.cleanup_old_data(before).await {
                Ok(counts) => info!(
                    "removed data older than {before}: {} calls, {} minute rows, {} alerts",
                    counts.call_records, counts.minute_stats, counts.alerts
                ),
                Err(e) => error!("data cleanup failed: {e}"),
            }
        });
    }
}

/// Instant of the next whole second after `now`
fn first_tick(now: DateTime<Utc>) -> Instant {
    let into_second = Duration::from_nanos(u64::from(now.timestamp_subsec_nanos() % 1_000_000_000));
    Instant::now() + (Duration::from_secs(1) - into_second)
}
