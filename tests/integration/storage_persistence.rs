//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Calls, alerts and minute stats written by a batch survive a reopen
//! - Retention cleanup removes old rows but keeps unresolved alerts

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tempfile::tempdir;
use websvc_monitor::actors::aggregator::MinuteAggregator;
use websvc_monitor::actors::pool::BatchRunner;
use websvc_monitor::monitors::probe::ProbeExecutor;
use websvc_monitor::storage::StorageBackend;
use websvc_monitor::storage::sqlite::SqliteBackend;
use websvc_monitor::{AlertKind, CallRecord, TargetConfig};

use crate::helpers::CountingTransport;

#[tokio::test]
async fn test_batch_results_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitor.db");

    let target_id = {
        let store = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        let id = store
            .upsert_target(&TargetConfig::new(0, "api", "http://localhost/api"))
            .await
            .unwrap();
        let mut target = store.load_active_targets(None).await.unwrap().remove(0);
        target.calls_per_batch = 3;

        let transport = CountingTransport::new(503, Duration::ZERO);
        let runner = BatchRunner::new(ProbeExecutor::new(transport), store.clone(), Duration::ZERO);
        runner.run_in_hour(&target, 12).await;

        let written = MinuteAggregator::new(store.clone())
            .aggregate_all(&[target], Utc::now())
            .await;
        assert_eq!(written, 1);

        store.close().await.unwrap();
        id
    };

    let store = SqliteBackend::new(&db_path).await.unwrap();
    let now = Utc::now();

    let records = store
        .query_call_records(target_id, now - TimeDelta::minutes(5), now)
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.status_code() == 503));

    let alerts = store.active_alerts(Some(target_id)).await.unwrap();
    assert_eq!(alerts.len(), 3);
    assert!(alerts.iter().all(|a| a.kind == AlertKind::Availability));

    let stats = store
        .query_minute_stats(target_id, now - TimeDelta::minutes(5), now)
        .await
        .unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].call_count, 3);
    assert_eq!(stats[0].success_count, 0);
}

#[tokio::test]
async fn test_retention_cleanup() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteBackend::new(temp_dir.path().join("monitor.db")).await.unwrap();

    let id = store
        .upsert_target(&TargetConfig::new(0, "api", "http://localhost/api"))
        .await
        .unwrap();

    let now = Utc::now();
    store
        .append_call_record(&CallRecord::response(id, now - TimeDelta::days(40), 0.1, 200))
        .await
        .unwrap();
    store
        .append_call_record(&CallRecord::response(id, now, 0.1, 200))
        .await
        .unwrap();

    let counts = store.cleanup_old_data(now - TimeDelta::days(30)).await.unwrap();

    assert_eq!(counts.call_records, 1);
    let left = store
        .query_call_records(id, now - TimeDelta::days(60), now)
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
}
