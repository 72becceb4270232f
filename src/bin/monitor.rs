use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use websvc_monitor::{
    actors::{lifecycle::MonitorController, pool::BatchRunner, scheduler::SchedulerConfig},
    config::{Settings, StorageKind},
    monitors::probe::ProbeExecutor,
    storage::{MemoryBackend, StorageBackend},
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults to the standard search locations)
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Only monitor these target ids, e.g. `--targets 1,2,3`
    #[arg(long, value_delimiter = ',')]
    targets: Vec<i64>,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![("websvc_monitor", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (settings, warnings) = Settings::load(args.config.as_deref())?;

    init(settings.log_level_filter());
    for warning in &warnings {
        warn!("{warning}");
    }
    trace!("started with args: {args:?}");
    trace!("settings: {settings:?}");

    let store = open_store(&settings).await?;
    let executor = ProbeExecutor::http().context("failed to build HTTP client")?;
    let config = SchedulerConfig::from_settings(&settings);
    let runner = BatchRunner::new(executor, store.clone(), config.batch_pause);

    let controller = MonitorController::new(store.clone(), Arc::new(runner), config);

    let outcome = controller.start(args.targets.clone()).await;
    if !outcome.ok {
        error!("{outcome}");
        store.close().await?;
        anyhow::bail!("monitoring could not be started: {outcome}");
    }
    info!("{outcome}");

    let (reload_tx, reload_rx) = mpsc::channel(1);
    spawn_reload_listener(reload_tx);

    controller.run_until_shutdown(reload_rx, shutdown_signal()).await;

    store.close().await?;
    Ok(())
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match settings.storage {
        #[cfg(feature = "storage-sqlite")]
        StorageKind::Sqlite => {
            let backend = websvc_monitor::storage::sqlite::SqliteBackend::new(&settings.db_path)
                .await
                .with_context(|| format!("failed to open database {}", settings.db_path.display()))?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageKind::Sqlite => {
            warn!("built without sqlite support, falling back to in-memory storage");
            Ok(Arc::new(MemoryBackend::new()))
        }
        StorageKind::Memory => {
            warn!("using in-memory storage, nothing will be persisted");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

/// Forward SIGHUP as reload requests.
fn spawn_reload_listener(reload_tx: mpsc::Sender<()>) {
    #[cfg(unix)]
    tokio::spawn(async move {
        let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("cannot listen for SIGHUP, reload disabled: {e}");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            info!("received SIGHUP, reloading targets");
            if reload_tx.try_send(()).is_err() {
                warn!("reload already pending");
            }
        }
    });

    #[cfg(not(unix))]
    drop(reload_tx);
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("received shutdown signal");
}
