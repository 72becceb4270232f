//! Storage backend trait definition
//!
//! This is the only contract between the monitoring core and persistence.
//! All implementations must tolerate concurrent writers: every worker in the
//! pool persists its own calls, and the minute aggregator reads while they do.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use crate::{Alert, AlertKind, CallRecord, MinuteStats, TargetConfig};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Rows removed by a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupCounts {
    pub call_records: usize,
    pub minute_stats: usize,
    pub alerts: usize,
}

/// Trait for persistent storage backends
///
/// Time ranges are inclusive on both ends. Methods return `StorageResult<T>`;
/// implementations convert backend-specific errors to `StorageError`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Load active targets ordered by name, optionally restricted to `ids`.
    ///
    /// An empty result is not an error.
    async fn load_active_targets(&self, ids: Option<&HashSet<i64>>) -> StorageResult<Vec<TargetConfig>>;

    /// Validate, then insert or update a target, matched by id (or by name when the id is unknown).
    ///
    /// Returns the stored id.
    async fn upsert_target(&self, target: &TargetConfig) -> StorageResult<i64>;

    async fn append_call_record(&self, record: &CallRecord) -> StorageResult<i64>;

    /// Call records of one target with `from <= timestamp <= to`, oldest first
    async fn query_call_records(
        &self,
        target_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<CallRecord>>;

    async fn append_minute_stats(&self, stats: &MinuteStats) -> StorageResult<i64>;

    /// Minute rows of one target whose window starts within `[from, to]`
    async fn query_minute_stats(
        &self,
        target_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<MinuteStats>>;

    async fn create_alert(&self, target_id: i64, kind: AlertKind, message: &str) -> StorageResult<i64>;

    /// Unresolved alerts, newest first
    async fn active_alerts(&self, target_id: Option<i64>) -> StorageResult<Vec<Alert>>;

    /// Mark an alert resolved. Returns `false` if no such alert exists.
    async fn resolve_alert(&self, alert_id: i64) -> StorageResult<bool>;

    /// Delete calls and minute rows older than `before`, and resolved alerts older than `before`
    async fn cleanup_old_data(&self, before: DateTime<Utc>) -> StorageResult<CleanupCounts>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
