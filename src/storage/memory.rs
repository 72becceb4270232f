//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Throwaway sessions where history does not matter
//!
//! ## Limitations
//!
//! - **No persistence**: all data lost on restart
//! - **Unbounded**: nothing is evicted until `cleanup_old_data` runs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::backend::{CleanupCounts, HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::config::validate_target;
use crate::{Alert, AlertKind, CallRecord, MinuteStats, TargetConfig};

#[derive(Debug, Default)]
struct Tables {
    targets: BTreeMap<i64, TargetConfig>,
    call_records: Vec<(i64, CallRecord)>,
    minute_stats: Vec<(i64, MinuteStats)>,
    alerts: Vec<Alert>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StorageError::ConnectionFailed("in-memory tables poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StorageError::ConnectionFailed("in-memory tables poisoned".to_string()))
    }

    /// Number of call records stored for `target_id`
    pub fn call_count(&self, target_id: i64) -> usize {
        self.read()
            .map(|t| t.call_records.iter().filter(|(_, r)| r.target_id == target_id).count())
            .unwrap_or(0)
    }

    /// All alerts (resolved or not), oldest first
    pub fn all_alerts(&self) -> Vec<Alert> {
        self.read().map(|t| t.alerts.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load_active_targets(&self, ids: Option<&HashSet<i64>>) -> StorageResult<Vec<TargetConfig>> {
        let tables = self.read()?;

        let mut targets: Vec<TargetConfig> = tables
            .targets
            .values()
            .filter(|t| t.active)
            .filter(|t| ids.is_none_or(|ids| ids.contains(&t.id)))
            .cloned()
            .collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));

        debug!("in-memory backend: loaded {} active targets", targets.len());
        Ok(targets)
    }

    async fn upsert_target(&self, target: &TargetConfig) -> StorageResult<i64> {
        validate_target(target)?;

        let mut tables = self.write()?;

        let existing = if tables.targets.contains_key(&target.id) {
            Some(target.id)
        } else {
            tables
                .targets
                .values()
                .find(|t| t.name == target.name)
                .map(|t| t.id)
        };

        let id = match existing {
            Some(id) => id,
            None if target.id > 0 => target.id,
            None => tables.next_id(),
        };
        tables.next_id = tables.next_id.max(id);

        let mut stored = target.clone();
        stored.id = id;
        tables.targets.insert(id, stored);

        Ok(id)
    }

    async fn append_call_record(&self, record: &CallRecord) -> StorageResult<i64> {
        let mut tables = self.write()?;
        let id = tables.next_id();
        tables.call_records.push((id, record.clone()));
        Ok(id)
    }

    async fn query_call_records(
        &self,
        target_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<CallRecord>> {
        let tables = self.read()?;

        let mut records: Vec<CallRecord> = tables
            .call_records
            .iter()
            .map(|(_, r)| r)
            .filter(|r| r.target_id == target_id && r.timestamp >= from && r.timestamp <= to)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);

        Ok(records)
    }

    async fn append_minute_stats(&self, stats: &MinuteStats) -> StorageResult<i64> {
        let mut tables = self.write()?;
        let id = tables.next_id();
        tables.minute_stats.push((id, stats.clone()));
        Ok(id)
    }

    async fn query_minute_stats(
        &self,
        target_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<MinuteStats>> {
        let tables = self.read()?;

        Ok(tables
            .minute_stats
            .iter()
            .map(|(_, s)| s)
            .filter(|s| s.target_id == target_id && s.window_start >= from && s.window_start <= to)
            .cloned()
            .collect())
    }

    async fn create_alert(&self, target_id: i64, kind: AlertKind, message: &str) -> StorageResult<i64> {
        let mut tables = self.write()?;
        let id = tables.next_id();

        tables.alerts.push(Alert {
            id,
            target_id,
            timestamp: Utc::now(),
            kind,
            message: message.to_string(),
            resolved: false,
            resolved_at: None,
        });

        Ok(id)
    }

    async fn active_alerts(&self, target_id: Option<i64>) -> StorageResult<Vec<Alert>> {
        let tables = self.read()?;

        let mut alerts: Vec<Alert> = tables
            .alerts
            .iter()
            .filter(|a| !a.resolved)
            .filter(|a| target_id.is_none_or(|id| a.target_id == id))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        Ok(alerts)
    }

    async fn resolve_alert(&self, alert_id: i64) -> StorageResult<bool> {
        let mut tables = self.write()?;

        match tables.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.resolved = true;
                alert.resolved_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cleanup_old_data(&self, before: DateTime<Utc>) -> StorageResult<CleanupCounts> {
        let mut tables = self.write()?;

        let calls_before = tables.call_records.len();
        tables.call_records.retain(|(_, r)| r.timestamp >= before);

        let stats_before = tables.minute_stats.len();
        tables.minute_stats.retain(|(_, s)| s.window_start >= before);

        let alerts_before = tables.alerts.len();
        tables.alerts.retain(|a| !(a.resolved && a.timestamp < before));

        Ok(CleanupCounts {
            call_records: calls_before - tables.call_records.len(),
            minute_stats: stats_before - tables.minute_stats.len(),
            alerts: alerts_before - tables.alerts.len(),
        })
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let tables = self.read()?;

        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("targets".to_string(), tables.targets.len().to_string()),
                ("call_records".to_string(), tables.call_records.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
