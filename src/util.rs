use std::collections::BTreeMap;

use crate::TargetConfig;

/// Prefix for settings overrides, e.g. `WEBSVC_MONITOR_MAX_WORKERS=4`.
pub const ENV_PREFIX: &str = "WEBSVC_MONITOR_";

pub fn env_key(setting: &str) -> String {
    format!("{ENV_PREFIX}{setting}")
}

pub fn get_env_setting(setting: &str) -> Option<String> {
    std::env::var(env_key(setting)).ok()
}

const DEFAULT_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Headers sent when a target does not configure any.
pub fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string())])
}

pub fn effective_headers(target: &TargetConfig) -> BTreeMap<String, String> {
    if target.headers.is_empty() {
        default_headers()
    } else {
        target.headers.clone()
    }
}
