use tracing::{error, instrument, warn};

use crate::storage::StorageBackend;
use crate::{AlertKind, CallOutcome, CallRecord, TargetConfig};

/// Classify one completed call.
///
/// A failed call (status outside `[200, 300)` or a transport failure) is an
/// availability problem; a successful call slower than `threshold_secs` is a
/// performance problem. At most one alert is produced per call.
pub fn evaluate(record: &CallRecord, threshold_secs: f64) -> Option<(AlertKind, String)> {
    if !record.is_success() {
        let message = match &record.outcome {
            CallOutcome::Response { status } => format!("status code: {status}"),
            CallOutcome::TransportFailure { error } => {
                format!("status code: {} ({error})", record.status_code())
            }
        };
        return Some((AlertKind::Availability, message));
    }

    if record.elapsed_secs > threshold_secs {
        return Some((
            AlertKind::Performance,
            format!("response time {:.2}s > {threshold_secs}s", record.elapsed_secs),
        ));
    }

    None
}

/// Persist a call and raise its alert, if any.
///
/// Storage failures are logged and swallowed. The alert is only created once
/// the call record itself has been stored. Returns the id of the created
/// alert.
#[instrument(skip_all, fields(target = %target.name))]
pub async fn record_call(store: &dyn StorageBackend, target: &TargetConfig, record: &CallRecord) -> Option<i64> {
    if let Err(e) = store.append_call_record(record).await {
        error!("failed to store call record for target {}: {e}", target.id);
        return None;
    }

    let (kind, message) = evaluate(record, target.alert_threshold)?;

    match store.create_alert(target.id, kind, &message).await {
        Ok(alert_id) => {
            warn!("{kind} alert for {} ({}): {message}", target.name, target.id);
            Some(alert_id)
        }
        Err(e) => {
            error!("failed to create {kind} alert for target {}: {e}", target.id);
            None
        }
    }
}
