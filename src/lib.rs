pub mod actors;
pub mod alerts;
pub mod config;
pub mod monitors;
pub mod storage;
pub mod util;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status code stored for calls that never got an HTTP response.
pub const TRANSPORT_FAILURE_STATUS: i32 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(format!("unsupported HTTP method: {other}")),
        }
    }
}

/// One monitored endpoint.
///
/// Targets are owned by the configuration surface; during a monitoring session
/// the core only ever reads them. Changing a target requires a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: i64,

    /// Unique, human readable name
    pub name: String,

    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body, only sent for POST
    #[serde(default)]
    pub payload: Option<String>,

    /// Per-probe timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Seconds between batches; aligned to the second of the minute
    #[serde(default = "default_call_interval")]
    pub call_interval: u32,

    #[serde(default = "default_calls_per_batch")]
    pub calls_per_batch: u32,

    /// Response time (seconds) above which a successful call raises a performance alert
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    #[serde(default = "default_active")]
    pub active: bool,

    /// Hour range like `9-17`, `22-6` or a single hour like `3`
    #[serde(default = "default_monitoring_hours")]
    pub monitoring_hours: String,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_call_interval() -> u32 {
    5
}

fn default_calls_per_batch() -> u32 {
    5
}

fn default_alert_threshold() -> f64 {
    2.0
}

fn default_active() -> bool {
    true
}

fn default_monitoring_hours() -> String {
    "0-23".to_string()
}

impl TargetConfig {
    /// Create a GET target with the stock cadence and alerting parameters.
    pub fn new(id: i64, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            method: HttpMethod::default(),
            headers: BTreeMap::new(),
            payload: None,
            timeout_secs: default_timeout_secs(),
            call_interval: default_call_interval(),
            calls_per_batch: default_calls_per_batch(),
            alert_threshold: default_alert_threshold(),
            active: default_active(),
            monitoring_hours: default_monitoring_hours(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How a single probe ended.
///
/// A call either produced an HTTP status or failed in transport with an error
/// text; the enum makes "neither" unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallOutcome {
    Response { status: u16 },
    TransportFailure { error: String },
}

/// Result of one probe against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub target_id: i64,

    /// Wall-clock seconds from dispatch to completion or failure
    pub elapsed_secs: f64,

    pub outcome: CallOutcome,
}

impl CallRecord {
    pub fn response(target_id: i64, timestamp: DateTime<Utc>, elapsed_secs: f64, status: u16) -> Self {
        Self {
            timestamp,
            target_id,
            elapsed_secs,
            outcome: CallOutcome::Response { status },
        }
    }

    pub fn transport_failure(
        target_id: i64,
        timestamp: DateTime<Utc>,
        elapsed_secs: f64,
        error: impl Into<String>,
    ) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "unknown transport failure".to_string();
        }

        Self {
            timestamp,
            target_id,
            elapsed_secs,
            outcome: CallOutcome::TransportFailure { error },
        }
    }

    /// Rebuild a record from its stored columns.
    ///
    /// Negative codes map back to a transport failure; codes outside the `u16`
    /// range are treated the same way.
    pub fn from_stored(
        target_id: i64,
        timestamp: DateTime<Utc>,
        elapsed_secs: f64,
        status_code: i32,
        error_message: Option<String>,
    ) -> Self {
        match u16::try_from(status_code) {
            Ok(status) => Self::response(target_id, timestamp, elapsed_secs, status),
            Err(_) => Self::transport_failure(
                target_id,
                timestamp,
                elapsed_secs,
                error_message.unwrap_or_default(),
            ),
        }
    }

    pub fn status_code(&self) -> i32 {
        match &self.outcome {
            CallOutcome::Response { status } => i32::from(*status),
            CallOutcome::TransportFailure { .. } => TRANSPORT_FAILURE_STATUS,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            CallOutcome::Response { .. } => None,
            CallOutcome::TransportFailure { error } => Some(error),
        }
    }

    /// Successful means an HTTP status in `[200, 300)`.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CallOutcome::Response { status } if (200..300).contains(&status))
    }
}

/// Per-target aggregate over one minute window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteStats {
    pub target_id: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub avg_elapsed: f64,
    pub min_elapsed: f64,
    pub max_elapsed: f64,
    pub call_count: u32,
    pub success_count: u32,
}

impl MinuteStats {
    pub fn success_rate(&self) -> f64 {
        if self.call_count == 0 {
            return 0.0;
        }
        f64::from(self.success_count) / f64::from(self.call_count) * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Availability,
    Performance,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Availability => write!(f, "availability"),
            AlertKind::Performance => write!(f, "performance"),
        }
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "availability" => Ok(AlertKind::Availability),
            "performance" => Ok(AlertKind::Performance),
            other => Err(format!("unknown alert kind: {other}")),
        }
    }
}

/// A stored alert. Alerts are only ever resolved by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub target_id: i64,
    pub timestamp: DateTime<Utc>,
    pub kind: AlertKind,
    pub message: String,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}
