//! Property-based tests for invariants using proptest
//!
//! These tests verify that certain properties hold true for all inputs:
//! - Monitoring-hours windows, including wraparound and fail-open parsing
//! - Due-second computation
//! - Call records always carry a status or an error text
//! - Minute statistics stay consistent with their input
//! - Alert classification

use chrono::{TimeDelta, Utc};
use proptest::prelude::*;
use websvc_monitor::actors::scheduler::is_due;
use websvc_monitor::alerts::evaluate;
use websvc_monitor::monitors::hours::in_window;
use websvc_monitor::{AlertKind, CallOutcome, CallRecord, MinuteStats, TRANSPORT_FAILURE_STATUS, TargetConfig};

// Property: "a-b" covers exactly [a, b], or wraps past midnight when a > b
proptest! {
    #[test]
    fn prop_hour_range_membership(a in 0u32..24, b in 0u32..24, hour in 0u32..24) {
        let expected = if a <= b {
            a <= hour && hour <= b
        } else {
            hour >= a || hour <= b
        };

        prop_assert_eq!(in_window(&format!("{a}-{b}"), hour), expected);
    }
}

// Property: anything that is not an hour or an hour range is always in window
proptest! {
    #[test]
    fn prop_malformed_hours_fail_open(raw in "[a-z:;,]{0,12}", hour in 0u32..24) {
        prop_assert!(in_window(&raw, hour));
    }
}

// Property: a target is due exactly on the seconds divisible by its interval
proptest! {
    #[test]
    fn prop_due_iff_second_divisible(interval in 1u32..=60, second in 0u32..60) {
        let mut target = TargetConfig::new(1, "api", "http://localhost");
        target.call_interval = interval;

        prop_assert_eq!(is_due(&target, second, 12), second % interval == 0);
    }
}

// Property: outside the monitoring window nothing is ever due
proptest! {
    #[test]
    fn prop_never_due_outside_window(interval in 1u32..=60, second in 0u32..60, hour in 0u32..9) {
        let mut target = TargetConfig::new(1, "api", "http://localhost");
        target.call_interval = interval;
        target.monitoring_hours = "9-17".to_string();

        prop_assert!(!is_due(&target, second, hour));
    }
}

// Property: a record has a real status or the sentinel plus error text, never neither
proptest! {
    #[test]
    fn prop_record_has_status_or_error(status in 0u16..600, error in ".{0,20}", failed in any::<bool>()) {
        let now = Utc::now();
        let record = if failed {
            CallRecord::transport_failure(1, now, 1.0, error)
        } else {
            CallRecord::response(1, now, 1.0, status)
        };

        match &record.outcome {
            CallOutcome::Response { status } => {
                prop_assert!(*status < 600);
                prop_assert_eq!(record.error_message(), None);
            }
            CallOutcome::TransportFailure { error } => {
                prop_assert_eq!(record.status_code(), TRANSPORT_FAILURE_STATUS);
                prop_assert!(!error.is_empty());
            }
        }
    }
}

// Property: minute stats count every record and stay internally ordered
proptest! {
    #[test]
    fn prop_minute_stats_consistent(calls in prop::collection::vec((0.0f64..30.0, 100u16..600), 1..50)) {
        let now = Utc::now();
        let records: Vec<CallRecord> = calls
            .iter()
            .map(|(elapsed, status)| CallRecord::response(1, now, *elapsed, *status))
            .collect();

        let stats = MinuteStats::from_records(1, now - TimeDelta::seconds(60), now, &records).unwrap();

        prop_assert_eq!(stats.call_count as usize, records.len());
        prop_assert!(stats.success_count <= stats.call_count);
        prop_assert!(stats.min_elapsed <= stats.avg_elapsed + 1e-9);
        prop_assert!(stats.avg_elapsed <= stats.max_elapsed + 1e-9);
    }
}

// Property: failures always alert on availability; successes only when slow
proptest! {
    #[test]
    fn prop_alert_classification(status in 100u16..600, elapsed in 0.0f64..10.0, threshold in 0.1f64..5.0) {
        let record = CallRecord::response(1, Utc::now(), elapsed, status);
        let alert = evaluate(&record, threshold).map(|(kind, _)| kind);

        let expected = if !(200..300).contains(&status) {
            Some(AlertKind::Availability)
        } else if elapsed > threshold {
            Some(AlertKind::Performance)
        } else {
            None
        };

        prop_assert_eq!(alert, expected);
    }
}
