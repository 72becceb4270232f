//! Lifecycle controller
//!
//! Start/Stop/Reload/Status over one scheduler session. All control calls
//! are serialized by a single async mutex. Every call answers with a
//! [`ControlOutcome`] instead of an error: the caller gets a flag and a
//! message it can show to a human.
//!
//! ```text
//! Stopped ──start (targets loaded)──▶ Running ──stop──▶ Stopped
//!    ▲                                   │
//!    └──────── reload, zero targets ─────┘
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::pool::{JobHandler, WorkerPool};
use super::scheduler::{PoolSlot, Scheduler, SchedulerConfig};
use crate::monitors::registry::TargetRegistry;
use crate::storage::StorageBackend;

/// Answer to a control call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOutcome {
    pub ok: bool,
    pub message: String,
}

impl ControlOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for ControlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Running,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Stopped => write!(f, "stopped"),
            MonitorState::Running => write!(f, "running"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub state: MonitorState,

    /// Always 0 while stopped
    pub active_targets: usize,
}

struct Session {
    shutdown_tx: watch::Sender<bool>,
    loop_handle: JoinHandle<()>,
    pool: PoolSlot,
}

#[derive(Default)]
struct ControlState {
    session: Option<Session>,

    /// Ids of the last successful `start`; empty means "all active targets"
    last_ids: Vec<i64>,
}

pub struct MonitorController {
    state: Mutex<ControlState>,
    registry: Arc<TargetRegistry>,
    store: Arc<dyn StorageBackend>,
    handler: Arc<dyn JobHandler>,
    config: SchedulerConfig,
}

impl MonitorController {
    pub fn new(store: Arc<dyn StorageBackend>, handler: Arc<dyn JobHandler>, config: SchedulerConfig) -> Self {
        Self {
            state: Mutex::new(ControlState::default()),
            registry: Arc::new(TargetRegistry::new()),
            store,
            handler,
            config,
        }
    }

    /// Start monitoring the given target ids (all active targets when empty).
    #[instrument(skip(self))]
    pub async fn start(&self, ids: Vec<i64>) -> ControlOutcome {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state, ids).await
    }

    #[instrument(skip(self))]
    pub async fn stop(&self) -> ControlOutcome {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await
    }

    /// Stop, then start again with the ids of the previous start.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> ControlOutcome {
        let mut state = self.state.lock().await;

        if !Self::is_running(&state) {
            return ControlOutcome::failed("monitoring is not running, nothing to reload");
        }

        let stopped = self.stop_locked(&mut state).await;
        debug!("reload: {stopped}");

        let ids = state.last_ids.clone();
        let started = self.start_locked(&mut state, ids).await;
        if started.ok {
            ControlOutcome::ok(format!(
                "configuration reloaded, monitoring {} targets",
                self.registry.len().await
            ))
        } else {
            ControlOutcome::failed(format!("reload failed: {}", started.message))
        }
    }

    pub async fn status(&self) -> MonitorStatus {
        let state = self.state.lock().await;

        if Self::is_running(&state) {
            MonitorStatus {
                state: MonitorState::Running,
                active_targets: self.registry.len().await,
            }
        } else {
            MonitorStatus {
                state: MonitorState::Stopped,
                active_targets: 0,
            }
        }
    }

    /// Serve reload requests until `shutdown` resolves, then stop cleanly.
    ///
    /// The binary feeds SIGHUP into `reload_rx` and uses SIGINT/SIGTERM as the
    /// shutdown future.
    pub async fn run_until_shutdown(&self, mut reload_rx: mpsc::Receiver<()>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                request = reload_rx.recv() => match request {
                    Some(()) => {
                        let outcome = self.reload().await;
                        if outcome.ok {
                            info!("{outcome}");
                        } else {
                            warn!("{outcome}");
                        }
                    }
                    None => {
                        // no more reload requests can arrive
                        shutdown.as_mut().await;
                        break;
                    }
                },
            }
        }

        info!("shutting down monitor");
        if Self::is_running(&*self.state.lock().await) {
            let outcome = self.stop().await;
            info!("{outcome}");
        }
    }

    fn is_running(state: &ControlState) -> bool {
        state
            .session
            .as_ref()
            .is_some_and(|session| !session.loop_handle.is_finished())
    }

    async fn start_locked(&self, state: &mut ControlState, ids: Vec<i64>) -> ControlOutcome {
        if Self::is_running(state) {
            return ControlOutcome::failed("monitoring is already running");
        }

        // a loop that exited on its own still owns a pool
        if state.session.is_some() {
            self.stop_locked(state).await;
        }

        let requested: HashSet<i64> = ids.iter().copied().collect();

        let count = match self.registry.load(self.store.as_ref(), Some(&requested)).await {
            Ok(count) => count,
            Err(e) => {
                error!("failed to load targets: {e}");
                return ControlOutcome::failed(format!("failed to load targets: {e}"));
            }
        };

        if count == 0 {
            warn!("no active targets, monitoring not started");
            return ControlOutcome::failed("no active targets to monitor");
        }

        let pool = match WorkerPool::spawn(self.config.pool_size, self.handler.clone()) {
            Ok(pool) => pool,
            Err(e) => {
                self.registry.clear().await;
                return ControlOutcome::failed(format!("failed to start worker pool: {e}"));
            }
        };
        let pool: PoolSlot = Arc::new(std::sync::Mutex::new(Some(pool)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = Scheduler::new(
            self.config.clone(),
            self.registry.clone(),
            self.store.clone(),
            self.handler.clone(),
            pool.clone(),
        );
        let loop_handle = tokio::spawn(scheduler.run(shutdown_rx));

        state.session = Some(Session {
            shutdown_tx,
            loop_handle,
            pool,
        });
        state.last_ids = ids;

        info!("monitoring started for {count} targets");
        ControlOutcome::ok(format!("monitoring started for {count} targets"))
    }

    async fn stop_locked(&self, state: &mut ControlState) -> ControlOutcome {
        let Some(session) = state.session.take() else {
            return ControlOutcome::failed("monitoring is not running");
        };

        info!("stopping monitoring");
        let _ = session.shutdown_tx.send(true);

        let timeout = self.config.stop_timeout;
        let mut loop_handle = session.loop_handle;
        let loop_stopped = match tokio::time::timeout(timeout, &mut loop_handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("scheduler loop ended abnormally: {e}");
                true
            }
            Err(_) => {
                warn!("scheduler loop did not stop within {}s", timeout.as_secs());
                loop_handle.abort();
                false
            }
        };

        let pool = match session.pool.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pool) = pool {
            pool.shutdown(timeout).await;
        }

        self.registry.clear().await;

        if loop_stopped {
            ControlOutcome::ok("monitoring stopped")
        } else {
            ControlOutcome::ok(format!(
                "monitoring stopped, but the scheduler loop did not exit within {}s",
                timeout.as_secs()
            ))
        }
    }
}
