//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: no separate database server required
//! - **WAL mode**: readers (the minute aggregator) do not block worker writes
//! - **Connection pooling**: one pool shared by every worker
//! - **Migrations**: automatic schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{CleanupCounts, HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::config::validate_target;
use crate::{Alert, AlertKind, CallRecord, HttpMethod, MinuteStats, TargetConfig};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file (and its parent directory) if missing
    /// 2. Configure SQLite for concurrent writers (WAL, busy timeout)
    /// 3. Run migrations to create tables
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path = db_path.as_ref();
        let db_path_str = db_path.to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn target_from_row(row: &SqliteRow) -> StorageResult<TargetConfig> {
        let name: String = row.try_get("name")?;

        let method_str: String = row.try_get("method")?;
        let method = method_str.parse::<HttpMethod>().unwrap_or_else(|e| {
            warn!("target {name}: {e}, falling back to GET");
            HttpMethod::Get
        });

        let headers_str: String = row.try_get("headers")?;
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers_str).unwrap_or_else(|e| {
            warn!("target {name}: malformed headers JSON ({e}), sending none");
            BTreeMap::new()
        });

        Ok(TargetConfig {
            id: row.try_get("id")?,
            name,
            url: row.try_get("url")?,
            method,
            headers,
            payload: row.try_get("payload")?,
            timeout_secs: row.try_get::<i64, _>("timeout_secs")?.max(0) as u64,
            call_interval: row.try_get::<i64, _>("call_interval")?.max(0) as u32,
            calls_per_batch: row.try_get::<i64, _>("calls_per_batch")?.max(0) as u32,
            alert_threshold: row.try_get("alert_threshold")?,
            active: row.try_get("is_active")?,
            monitoring_hours: row.try_get("monitoring_hours")?,
        })
    }

    fn call_record_from_row(row: &SqliteRow) -> StorageResult<CallRecord> {
        Ok(CallRecord::from_stored(
            row.try_get("target_id")?,
            Self::millis_to_timestamp(row.try_get("timestamp")?),
            row.try_get("elapsed_secs")?,
            row.try_get::<i64, _>("status_code")? as i32,
            row.try_get("error_message")?,
        ))
    }

    fn minute_stats_from_row(row: &SqliteRow) -> StorageResult<MinuteStats> {
        Ok(MinuteStats {
            target_id: row.try_get("target_id")?,
            window_start: Self::millis_to_timestamp(row.try_get("window_start")?),
            window_end: Self::millis_to_timestamp(row.try_get("window_end")?),
            avg_elapsed: row.try_get("avg_elapsed")?,
            min_elapsed: row.try_get("min_elapsed")?,
            max_elapsed: row.try_get("max_elapsed")?,
            call_count: row.try_get::<i64, _>("call_count")? as u32,
            success_count: row.try_get::<i64, _>("success_count")? as u32,
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
        let kind_str: String = row.try_get("kind")?;
        let kind = kind_str
            .parse::<AlertKind>()
            .map_err(StorageError::SerializationError)?;

        Ok(Alert {
            id: row.try_get("id")?,
            target_id: row.try_get("target_id")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
            kind,
            message: row.try_get("message")?,
            resolved: row.try_get("resolved")?,
            resolved_at: row
                .try_get::<Option<i64>, _>("resolved_at")?
                .map(Self::millis_to_timestamp),
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self))]
    async fn load_active_targets(&self, ids: Option<&HashSet<i64>>) -> StorageResult<Vec<TargetConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, url, method, headers, payload, call_interval, calls_per_batch,
                   timeout_secs, alert_threshold, is_active, monitoring_hours
            FROM targets
            WHERE is_active = 1
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let targets = rows
            .iter()
            .map(Self::target_from_row)
            .filter(|t| match (t, ids) {
                (Ok(t), Some(ids)) => ids.contains(&t.id),
                _ => true,
            })
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("loaded {} active targets", targets.len());
        Ok(targets)
    }

    #[instrument(skip(self, target), fields(target = %target.name))]
    async fn upsert_target(&self, target: &TargetConfig) -> StorageResult<i64> {
        validate_target(target)?;

        let now = Self::timestamp_to_millis(&Utc::now());
        let headers_json = serde_json::to_string(&target.headers)?;

        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM targets WHERE id = ? OR name = ? ORDER BY id = ? DESC LIMIT 1")
            .bind(target.id)
            .bind(&target.name)
            .bind(target.id)
            .fetch_optional(&mut *tx)
            .await?;

        let id = match existing {
            Some((id,)) => {
                sqlx::query(
                    r#"
                    UPDATE targets
                    SET name = ?, url = ?, method = ?, headers = ?, payload = ?,
                        call_interval = ?, calls_per_batch = ?, timeout_secs = ?,
                        alert_threshold = ?, is_active = ?, monitoring_hours = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&target.name)
                .bind(&target.url)
                .bind(target.method.to_string())
                .bind(&headers_json)
                .bind(&target.payload)
                .bind(i64::from(target.call_interval))
                .bind(i64::from(target.calls_per_batch))
                .bind(target.timeout_secs as i64)
                .bind(target.alert_threshold)
                .bind(target.active)
                .bind(&target.monitoring_hours)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO targets (
                        id, name, url, method, headers, payload, call_interval, calls_per_batch,
                        timeout_secs, alert_threshold, is_active, monitoring_hours, created_at, updated_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind((target.id > 0).then_some(target.id))
                .bind(&target.name)
                .bind(&target.url)
                .bind(target.method.to_string())
                .bind(&headers_json)
                .bind(&target.payload)
                .bind(i64::from(target.call_interval))
                .bind(i64::from(target.calls_per_batch))
                .bind(target.timeout_secs as i64)
                .bind(target.alert_threshold)
                .bind(target.active)
                .bind(&target.monitoring_hours)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                result.last_insert_rowid()
            }
        };

        tx.commit().await?;
        Ok(id)
    }

    async fn append_call_record(&self, record: &CallRecord) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO call_records (target_id, timestamp, elapsed_secs, status_code, error_message)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.target_id)
        .bind(Self::timestamp_to_millis(&record.timestamp))
        .bind(record.elapsed_secs)
        .bind(i64::from(record.status_code()))
        .bind(record.error_message())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self))]
    async fn query_call_records(
        &self,
        target_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<CallRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT target_id, timestamp, elapsed_secs, status_code, error_message
            FROM call_records
            WHERE target_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(target_id)
        .bind(Self::timestamp_to_millis(&from))
        .bind(Self::timestamp_to_millis(&to))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::call_record_from_row).collect()
    }

    async fn append_minute_stats(&self, stats: &MinuteStats) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO minute_stats (
                target_id, window_start, window_end, avg_elapsed, min_elapsed, max_elapsed,
                call_count, success_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stats.target_id)
        .bind(Self::timestamp_to_millis(&stats.window_start))
        .bind(Self::timestamp_to_millis(&stats.window_end))
        .bind(stats.avg_elapsed)
        .bind(stats.min_elapsed)
        .bind(stats.max_elapsed)
        .bind(i64::from(stats.call_count))
        .bind(i64::from(stats.success_count))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self))]
    async fn query_minute_stats(
        &self,
        target_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<MinuteStats>> {
        let rows = sqlx::query(
            r#"
            SELECT target_id, window_start, window_end, avg_elapsed, min_elapsed, max_elapsed,
                   call_count, success_count
            FROM minute_stats
            WHERE target_id = ? AND window_start >= ? AND window_start <= ?
            ORDER BY window_start ASC
            "#,
        )
        .bind(target_id)
        .bind(Self::timestamp_to_millis(&from))
        .bind(Self::timestamp_to_millis(&to))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::minute_stats_from_row).collect()
    }

    async fn create_alert(&self, target_id: i64, kind: AlertKind, message: &str) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (target_id, timestamp, kind, message)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(target_id)
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(kind.to_string())
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn active_alerts(&self, target_id: Option<i64>) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, target_id, timestamp, kind, message, resolved, resolved_at
            FROM alerts
            WHERE resolved = 0 AND (? IS NULL OR target_id = ?)
            ORDER BY timestamp DESC, id DESC
            "#,
        )
        .bind(target_id)
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    async fn resolve_alert(&self, alert_id: i64) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE alerts SET resolved = 1, resolved_at = ? WHERE id = ?")
            .bind(Self::timestamp_to_millis(&Utc::now()))
            .bind(alert_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_data(&self, before: DateTime<Utc>) -> StorageResult<CleanupCounts> {
        let before_millis = Self::timestamp_to_millis(&before);

        info!("cleaning up data older than {}", before);

        let mut tx = self.pool.begin().await?;

        let call_records = sqlx::query("DELETE FROM call_records WHERE timestamp < ?")
            .bind(before_millis)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;

        let minute_stats = sqlx::query("DELETE FROM minute_stats WHERE window_start < ?")
            .bind(before_millis)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;

        let alerts = sqlx::query("DELETE FROM alerts WHERE resolved = 1 AND timestamp < ?")
            .bind(before_millis)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;

        tx.commit().await?;

        let counts = CleanupCounts {
            call_records,
            minute_stats,
            alerts,
        };
        info!("deleted {:?}", counts);
        Ok(counts)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
