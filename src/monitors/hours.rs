//! Monitoring-hours windows
//!
//! A window is either a single hour (`"3"`) or an inclusive hour range
//! (`"9-17"`). A range whose start is after its end wraps past midnight, so
//! `"22-6"` covers 22:00 through 06:59.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::TargetConfig;

static HOURS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2})\s*(?:-\s*(\d{1,2})\s*)?$").expect("monitoring hours pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoursError {
    Empty,
    Malformed(String),
    OutOfRange(u32),
}

impl fmt::Display for HoursError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoursError::Empty => write!(f, "monitoring hours must not be empty"),
            HoursError::Malformed(raw) => {
                write!(f, "'{raw}' is neither an hour (e.g. '9') nor a range (e.g. '9-17')")
            }
            HoursError::OutOfRange(hour) => write!(f, "hour {hour} is outside 0-23"),
        }
    }
}

impl std::error::Error for HoursError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringHours {
    Single(u32),
    Range { start: u32, end: u32 },
}

impl MonitoringHours {
    pub fn parse(raw: &str) -> Result<Self, HoursError> {
        if raw.trim().is_empty() {
            return Err(HoursError::Empty);
        }

        let captures = HOURS_PATTERN
            .captures(raw)
            .ok_or_else(|| HoursError::Malformed(raw.to_string()))?;

        let hour = |idx: usize| -> Result<Option<u32>, HoursError> {
            let Some(m) = captures.get(idx) else {
                return Ok(None);
            };
            let value: u32 = m
                .as_str()
                .parse()
                .map_err(|_| HoursError::Malformed(raw.to_string()))?;
            if value > 23 {
                return Err(HoursError::OutOfRange(value));
            }
            Ok(Some(value))
        };

        let start = hour(1)?.ok_or_else(|| HoursError::Malformed(raw.to_string()))?;
        Ok(match hour(2)? {
            Some(end) => MonitoringHours::Range { start, end },
            None => MonitoringHours::Single(start),
        })
    }

    pub fn contains(&self, hour: u32) -> bool {
        match *self {
            MonitoringHours::Single(h) => hour == h,
            MonitoringHours::Range { start, end } if start <= end => start <= hour && hour <= end,
            MonitoringHours::Range { start, end } => hour >= start || hour <= end,
        }
    }
}

impl FromStr for MonitoringHours {
    type Err = HoursError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MonitoringHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitoringHours::Single(h) => write!(f, "{h}"),
            MonitoringHours::Range { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

/// Window check that treats an unparsable window as "always monitored".
pub fn in_window(raw: &str, hour: u32) -> bool {
    MonitoringHours::parse(raw).map_or(true, |hours| hours.contains(hour))
}

impl TargetConfig {
    /// Whether `hour` (local, 0-23) falls inside this target's monitoring window.
    ///
    /// Fails open: a window that cannot be parsed is logged and treated as
    /// always active.
    pub fn in_monitoring_hours(&self, hour: u32) -> bool {
        match MonitoringHours::parse(&self.monitoring_hours) {
            Ok(hours) => hours.contains(hour),
            Err(e) => {
                warn!(
                    "target {} ({}): {e}, monitoring around the clock",
                    self.name, self.id
                );
                true
            }
        }
    }
}
