//! Integration tests for the monitor lifecycle
//!
//! These tests drive the real scheduler loop, so they run on wall-clock time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use websvc_monitor::actors::lifecycle::{MonitorController, MonitorState, MonitorStatus};
use websvc_monitor::actors::pool::BatchRunner;
use websvc_monitor::actors::scheduler::SchedulerConfig;
use websvc_monitor::monitors::probe::ProbeExecutor;
use websvc_monitor::storage::{MemoryBackend, StorageBackend};
use websvc_monitor::TargetConfig;

use crate::helpers::{CountingTransport, wait_until};

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        batch_pause: Duration::from_millis(50),
        pool_size: 2,
        retention: None,
        stop_timeout: Duration::from_secs(3),
        ..SchedulerConfig::default()
    }
}

fn controller_for(store: Arc<MemoryBackend>, transport: Arc<CountingTransport>) -> MonitorController {
    let config = test_config();
    let runner = BatchRunner::new(ProbeExecutor::new(transport), store.clone(), config.batch_pause);
    MonitorController::new(store, Arc::new(runner), config)
}

#[tokio::test]
async fn test_start_with_empty_registry() {
    let store = Arc::new(MemoryBackend::new());
    let controller = controller_for(store, CountingTransport::new(200, Duration::ZERO));

    let outcome = controller.start(vec![]).await;

    assert!(!outcome.ok);
    assert!(outcome.message.contains("no active targets"));
    assert_eq!(
        controller.status().await,
        MonitorStatus {
            state: MonitorState::Stopped,
            active_targets: 0,
        }
    );
}

#[tokio::test]
async fn test_every_second_target_is_probed() {
    let store = Arc::new(MemoryBackend::new());
    let mut target = TargetConfig::new(0, "fast", "http://localhost/fast");
    target.call_interval = 1;
    target.calls_per_batch = 1;
    let id = store.upsert_target(&target).await.unwrap();

    let transport = CountingTransport::new(200, Duration::ZERO);
    let controller = controller_for(store.clone(), transport.clone());

    assert!(controller.start(vec![]).await.ok);
    assert!(wait_until(Duration::from_secs(4), || store.call_count(id) >= 2).await);

    assert!(controller.stop().await.ok);
}

#[tokio::test]
async fn test_stop_lets_started_batches_finish() {
    let store = Arc::new(MemoryBackend::new());
    let mut target = TargetConfig::new(0, "slow", "http://localhost/slow");
    target.call_interval = 1;
    target.calls_per_batch = 3;
    target.timeout_secs = 5;
    let id = store.upsert_target(&target).await.unwrap();

    let transport = CountingTransport::new(200, Duration::from_millis(400));
    let controller = controller_for(store.clone(), transport.clone());

    assert!(controller.start(vec![]).await.ok);
    assert!(wait_until(Duration::from_secs(3), || transport.started() >= 1).await);

    let started = Instant::now();
    let outcome = controller.stop().await;
    assert!(outcome.ok, "{outcome}");
    assert!(started.elapsed() < Duration::from_secs(3) * 2);

    // every batch that had begun made all of its calls before stop returned
    assert_eq!(transport.started(), transport.finished());
    let calls_at_stop = store.call_count(id);
    assert_eq!(calls_at_stop, transport.finished());
    assert!(calls_at_stop >= 3);
    assert_eq!(calls_at_stop % 3, 0);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(transport.started(), transport.finished());
    assert_eq!(store.call_count(id), calls_at_stop);
    assert_eq!(controller.status().await.state, MonitorState::Stopped);
}
