//! Integration tests for the probe → persist → alert → aggregate pipeline

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use websvc_monitor::actors::aggregator::MinuteAggregator;
use websvc_monitor::actors::pool::BatchRunner;
use websvc_monitor::monitors::probe::ProbeExecutor;
use websvc_monitor::storage::{MemoryBackend, StorageBackend};
use websvc_monitor::{AlertKind, TargetConfig};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::CountingTransport;

#[tokio::test]
async fn test_failing_target_floods_alerts_and_aggregates() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(10)
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryBackend::new());
    let runner = BatchRunner::new(ProbeExecutor::http().unwrap(), store.clone(), Duration::ZERO);

    let mut target = TargetConfig::new(1, "failing", mock_server.uri());
    target.call_interval = 5;
    target.calls_per_batch = 10;
    target.alert_threshold = 2.0;

    assert_eq!(runner.run_in_hour(&target, 12).await, 10);

    let now = Utc::now();
    let records = store
        .query_call_records(1, now - TimeDelta::seconds(60), now)
        .await
        .unwrap();
    assert_eq!(records.len(), 10);
    assert!(records.iter().all(|r| r.status_code() == 500));

    let alerts = store.active_alerts(Some(1)).await.unwrap();
    assert_eq!(alerts.len(), 10);
    assert!(alerts.iter().all(|a| a.kind == AlertKind::Availability));

    let stats = MinuteAggregator::new(store.clone())
        .aggregate_target(&target, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.call_count, 10);
    assert_eq!(stats.success_count, 0);
}

#[tokio::test]
async fn test_slow_success_raises_performance_alert() {
    let store = Arc::new(MemoryBackend::new());
    let transport = CountingTransport::new(200, Duration::from_millis(150));
    let runner = BatchRunner::new(ProbeExecutor::new(transport.clone()), store.clone(), Duration::ZERO);

    let mut target = TargetConfig::new(2, "sluggish", "http://localhost/sluggish");
    target.calls_per_batch = 2;
    target.alert_threshold = 0.1;

    runner.run_in_hour(&target, 12).await;

    let alerts = store.active_alerts(Some(2)).await.unwrap();
    assert_eq!(transport.finished(), 2);
    assert_eq!(alerts.len(), 2);
    assert!(alerts.iter().all(|a| a.kind == AlertKind::Performance));
    assert!(alerts[0].message.starts_with("response time"));
}

#[tokio::test]
async fn test_fast_success_is_quiet() {
    let store = Arc::new(MemoryBackend::new());
    let transport = CountingTransport::new(200, Duration::ZERO);
    let runner = BatchRunner::new(ProbeExecutor::new(transport), store.clone(), Duration::ZERO);

    let mut target = TargetConfig::new(3, "healthy", "http://localhost/healthy");
    target.calls_per_batch = 3;

    runner.run_in_hour(&target, 12).await;

    assert_eq!(store.call_count(3), 3);
    assert!(store.active_alerts(None).await.unwrap().is_empty());
}
