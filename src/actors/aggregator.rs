//! Minute aggregator
//!
//! Rolls the raw calls of the last 60 seconds into one [`MinuteStats`] row
//! per target. Windows with no calls produce no row. The window may still be
//! filling up while in-flight batches write to it; the result is best effort.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use tracing::{debug, error};

use crate::storage::{StorageBackend, StorageResult};
use crate::{CallRecord, MinuteStats, TargetConfig};

const WINDOW: TimeDelta = TimeDelta::seconds(60);

impl MinuteStats {
    /// Summarise `records` over `[window_start, window_end]`, or `None` when there are none.
    pub fn from_records(
        target_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        records: &[CallRecord],
    ) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let (sum, min, max) = records.iter().fold(
            (0.0, f64::INFINITY, f64::NEG_INFINITY),
            |(sum, min, max), r| (sum + r.elapsed_secs, min.min(r.elapsed_secs), max.max(r.elapsed_secs)),
        );
        let call_count = records.len() as u32;
        let success_count = records.iter().filter(|r| r.is_success()).count() as u32;

        Some(Self {
            target_id,
            window_start,
            window_end,
            avg_elapsed: sum / f64::from(call_count),
            min_elapsed: min,
            max_elapsed: max,
            call_count,
            success_count,
        })
    }
}

#[derive(Clone)]
pub struct MinuteAggregator {
    store: Arc<dyn StorageBackend>,
}

impl MinuteAggregator {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self { store }
    }

    /// Aggregate `[now - 60s, now]` for one target and persist the row.
    pub async fn aggregate_target(&self, target: &TargetConfig, now: DateTime<Utc>) -> StorageResult<Option<MinuteStats>> {
        let window_start = now - WINDOW;
        let records = self.store.query_call_records(target.id, window_start, now).await?;

        let Some(stats) = MinuteStats::from_records(target.id, window_start, now, &records) else {
            debug!("no calls for {} in the last minute", target.name);
            return Ok(None);
        };

        self.store.append_minute_stats(&stats).await?;
        debug!(
            "minute stats for {}: {} calls, {} ok, avg {:.3}s",
            target.name, stats.call_count, stats.success_count, stats.avg_elapsed
        );

        Ok(Some(stats))
    }

    /// Aggregate every target concurrently. Failures are logged per target.
    /// Returns the number of rows written.
    pub async fn aggregate_all(&self, targets: &[TargetConfig], now: DateTime<Utc>) -> usize {
        let results = join_all(targets.iter().map(|t| self.aggregate_target(t, now))).await;

        results
            .into_iter()
            .zip(targets)
            .filter_map(|(result, target)| match result {
                Ok(stats) => stats,
                Err(e) => {
                    error!("minute aggregation failed for {} ({}): {e}", target.name, target.id);
                    None
                }
            })
            .count()
    }
}
