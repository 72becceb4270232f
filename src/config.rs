use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::level_filters::LevelFilter;
use tracing::{debug, trace};

use crate::TargetConfig;
use crate::monitors::hours::MonitoringHours;
use crate::util::get_env_setting;

/// Which storage backend the monitor persists to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// SQLite database file at `DB_PATH` (default)
    #[default]
    Sqlite,

    /// No persistence
    Memory,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageKind::Sqlite),
            "memory" | "none" => Ok(StorageKind::Memory),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Process-level settings.
///
/// Keys use the legacy upper-case names so an existing `config.json` keeps
/// working; unknown keys (report and log directories etc.) are ignored.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub log_level: String,
    pub max_workers: usize,

    /// Raw calls, minute rows and resolved alerts older than this are deleted; 0 keeps everything
    pub data_retention_days: u32,

    /// How long `Stop` waits for the scheduler loop before giving up on it
    pub stop_timeout_secs: u64,

    pub storage: StorageKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/webservice_monitor.db"),
            log_level: "INFO".to_string(),
            max_workers: 10,
            data_retention_days: 30,
            stop_timeout_secs: 10,
            storage: StorageKind::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the first default location that exists.
    ///
    /// A `.env` file is honoured and `WEBSVC_MONITOR_*` variables override
    /// whatever the file says. Settings decide the log level, so this runs
    /// before logging is set up: warnings come back to the caller instead of
    /// being logged here.
    pub fn load(path: Option<&str>) -> anyhow::Result<(Settings, Vec<String>)> {
        dotenv::dotenv().ok();

        let mut warnings = Vec::new();
        let mut settings = match path {
            Some(path) => read_config_file(path)?,
            None => match default_config_paths().into_iter().find(|p| p.exists()) {
                Some(found) => read_config_file(&found.to_string_lossy())?,
                None => {
                    warnings.push("no configuration file found, using defaults".to_string());
                    Settings::default()
                }
            },
        };

        warnings.extend(settings.apply_overrides(get_env_setting));
        warnings.extend(settings.check_log_level());
        Ok((settings, warnings))
    }

    /// Apply overrides looked up by setting name (e.g. `MAX_WORKERS`).
    ///
    /// Values that do not parse are ignored; one warning per ignored value is returned.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        if let Some(value) = lookup("DB_PATH") {
            self.db_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.log_level = value;
        }

        [
            override_parsed(&lookup, "MAX_WORKERS", &mut self.max_workers),
            override_parsed(&lookup, "DATA_RETENTION_DAYS", &mut self.data_retention_days),
            override_parsed(&lookup, "STOP_TIMEOUT_SECS", &mut self.stop_timeout_secs),
            override_parsed(&lookup, "STORAGE", &mut self.storage),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn check_log_level(&self) -> Option<String> {
        self.log_level
            .parse::<LevelFilter>()
            .err()
            .map(|_| format!("invalid LOG_LEVEL '{}', using INFO", self.log_level))
    }

    /// The configured level, or INFO when it does not parse
    pub fn log_level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::INFO)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Option<String>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = lookup(key)?;

    match raw.parse::<T>() {
        Ok(value) => {
            debug!("setting {key} overridden from environment");
            *slot = value;
            None
        }
        Err(e) => Some(format!("ignoring override for {key} ('{raw}'): {e}")),
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("config.json")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".webservice_monitor").join("config.json"));
    }
    paths.push(PathBuf::from("/etc/webservice_monitor/config.json"));
    paths
}

pub fn read_config_file(path: &str) -> anyhow::Result<Settings> {
    let file_content = std::fs::read_to_string(Path::new(path))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|settings| trace!("loaded settings: {settings:?}"))
}

/// Reasons a target definition is rejected
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    InvalidUrl(String),
    InvalidMonitoringHours(String),
    InvalidAlertThreshold(f64),
    InvalidCallInterval(u32),
    InvalidCallsPerBatch,
    InvalidTimeout,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidUrl(msg) => write!(f, "invalid URL: {msg}"),
            ValidationError::InvalidMonitoringHours(msg) => write!(f, "invalid monitoring hours: {msg}"),
            ValidationError::InvalidAlertThreshold(v) => {
                write!(f, "alert threshold must be in (0, 60] seconds, got {v}")
            }
            ValidationError::InvalidCallInterval(v) => {
                write!(f, "call interval must be between 1 and 60 seconds, got {v}")
            }
            ValidationError::InvalidCallsPerBatch => write!(f, "calls per batch must be at least 1"),
            ValidationError::InvalidTimeout => write!(f, "timeout must be at least 1 second"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check a target before it is stored.
///
/// The scheduler never calls this: it tolerates bad hour ranges (fail-open)
/// and skips zero intervals.
pub fn validate_target(target: &TargetConfig) -> Result<(), ValidationError> {
    let url = reqwest::Url::parse(&target.url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidUrl(format!(
            "scheme must be http or https, got {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::InvalidUrl("missing host".to_string()));
    }

    MonitoringHours::parse(&target.monitoring_hours)
        .map_err(|e| ValidationError::InvalidMonitoringHours(e.to_string()))?;

    if !(target.alert_threshold > 0.0 && target.alert_threshold <= 60.0) {
        return Err(ValidationError::InvalidAlertThreshold(target.alert_threshold));
    }
    if !(1..=60).contains(&target.call_interval) {
        return Err(ValidationError::InvalidCallInterval(target.call_interval));
    }
    if target.calls_per_batch == 0 {
        return Err(ValidationError::InvalidCallsPerBatch);
    }
    if target.timeout_secs == 0 {
        return Err(ValidationError::InvalidTimeout);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_settings_accept_legacy_keys() {
        let json = r#"{
            "DB_PATH": "/var/lib/monitor/monitor.db",
            "LOG_DIR": "logs",
            "REPORT_DIR": "reports",
            "MAX_WORKERS": 4,
            "DATA_RETENTION_DAYS": 7
        }"#;

        let settings: Settings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.db_path, PathBuf::from("/var/lib/monitor/monitor.db"));
        assert_eq!(settings.max_workers, 4);
        assert_eq!(settings.data_retention_days, 7);
        assert_eq!(settings.stop_timeout_secs, 10);
        assert_eq!(settings.storage, StorageKind::Sqlite);
    }

    #[test]
    fn test_overrides_parse_or_keep() {
        let env = HashMap::from([
            ("MAX_WORKERS", "3"),
            ("DATA_RETENTION_DAYS", "not-a-number"),
            ("STORAGE", "memory"),
            ("LOG_LEVEL", "debug"),
        ]);

        let mut settings = Settings::default();
        let warnings = settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("DATA_RETENTION_DAYS"), "{warnings:?}");
        assert_eq!(settings.max_workers, 3);
        assert_eq!(settings.data_retention_days, 30);
        assert_eq!(settings.storage, StorageKind::Memory);
        assert_eq!(settings.log_level_filter(), LevelFilter::DEBUG);
    }

    #[test]
    fn test_read_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"STORAGE": "memory", "STOP_TIMEOUT_SECS": 3}"#).unwrap();

        let settings = read_config_file(&path.to_string_lossy()).unwrap();
        assert_eq!(settings.storage, StorageKind::Memory);
        assert_eq!(settings.stop_timeout(), Duration::from_secs(3));

        std::fs::write(&path, "{not json").unwrap();
        assert!(read_config_file(&path.to_string_lossy()).is_err());
    }

    #[test]
    fn test_load_reports_warnings_instead_of_logging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"LOG_LEVEL": "loud", "MAX_WORKERS": 2}"#).unwrap();

        let path = path.to_string_lossy().into_owned();
        let (settings, warnings) = Settings::load(Some(path.as_str())).unwrap();

        assert_eq!(settings.max_workers, 2);
        assert_eq!(settings.log_level_filter(), LevelFilter::INFO);
        assert!(
            warnings.iter().any(|w| w.contains("invalid LOG_LEVEL 'loud'")),
            "{warnings:?}"
        );
    }

    #[test]
    fn test_validate_target() {
        let target = TargetConfig::new(1, "api", "https://example.com/health");
        assert_eq!(validate_target(&target), Ok(()));

        let mut bad_scheme = target.clone();
        bad_scheme.url = "ftp://example.com".to_string();
        assert_matches!(validate_target(&bad_scheme), Err(ValidationError::InvalidUrl(_)));

        let mut bad_hours = target.clone();
        bad_hours.monitoring_hours = "9-25".to_string();
        assert_matches!(
            validate_target(&bad_hours),
            Err(ValidationError::InvalidMonitoringHours(_))
        );

        let mut bad_threshold = target.clone();
        bad_threshold.alert_threshold = 0.0;
        assert_matches!(
            validate_target(&bad_threshold),
            Err(ValidationError::InvalidAlertThreshold(_))
        );

        let mut bad_interval = target.clone();
        bad_interval.call_interval = 61;
        assert_eq!(
            validate_target(&bad_interval),
            Err(ValidationError::InvalidCallInterval(61))
        );

        let mut no_calls = target;
        no_calls.calls_per_batch = 0;
        assert_eq!(validate_target(&no_calls), Err(ValidationError::InvalidCallsPerBatch));
    }
}
