use std::{collections::HashMap, fs, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use server_api::{CountryCodePrefix, DigitsOnly, PhoneNormalizer, DEFAULT_COUNTRY_CODE};
use session_core::{
    AuthFailurePolicy, BackoffTable, ControllerConfig, DEFAULT_DESTROY_TIMEOUT,
    DEFAULT_INITIALIZE_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_PROBE_TIMEOUT,
};
use session_integration::{bridge::BridgeConfig, SessionStoreConfig};
use tracing::warn;
use url::Url;

pub const CONFIG_FILE: &str = "gateway.toml";
const ENV_PREFIX: &str = "GATEWAY__";

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub bridge_url: String,
    pub session_dir: PathBuf,
    pub client_id: String,
    pub max_reconnect_attempts: u32,
    pub backoff: BackoffTable,
    pub keepalive_interval: Duration,
    pub initialize_timeout: Duration,
    pub destroy_timeout: Duration,
    pub request_timeout: Duration,
    pub default_country_code: String,
    pub auth_failure_policy: AuthFailurePolicy,
    pub crash_exit_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        let store = SessionStoreConfig::default();
        Self {
            bind_addr: "0.0.0.0:5000".into(),
            bridge_url: "ws://127.0.0.1:5100/session".into(),
            session_dir: store.data_dir,
            client_id: store.client_id,
            max_reconnect_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffTable::default(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            initialize_timeout: DEFAULT_INITIALIZE_TIMEOUT,
            destroy_timeout: DEFAULT_DESTROY_TIMEOUT,
            request_timeout: Duration::from_secs(60),
            default_country_code: DEFAULT_COUNTRY_CODE.into(),
            auth_failure_policy: AuthFailurePolicy::default(),
            crash_exit_delay: Duration::from_secs(30),
        }
    }
}

impl Settings {
    pub fn store(&self) -> SessionStoreConfig {
        SessionStoreConfig {
            data_dir: self.session_dir.clone(),
            client_id: self.client_id.clone(),
            ..SessionStoreConfig::default()
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_attempts: self.max_reconnect_attempts,
            backoff: self.backoff.clone(),
            keepalive_interval: self.keepalive_interval,
            probe_timeout: DEFAULT_PROBE_TIMEOUT.min(self.keepalive_interval),
            initialize_timeout: self.initialize_timeout,
            destroy_timeout: self.destroy_timeout,
            auth_failure_policy: self.auth_failure_policy,
            store: self.store(),
        }
    }

    pub fn bridge_config(&self) -> anyhow::Result<BridgeConfig> {
        let url = Url::parse(&self.bridge_url)
            .with_context(|| format!("invalid bridge url '{}'", self.bridge_url))?;
        Ok(BridgeConfig {
            url,
            store: self.store(),
            request_timeout: self.request_timeout,
        })
    }

    pub fn phone_normalizer(&self) -> Arc<dyn PhoneNormalizer> {
        if self.default_country_code.trim().is_empty() {
            Arc::new(DigitsOnly)
        } else {
            Arc::new(CountryCodePrefix::new(self.default_country_code.clone()))
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(CONFIG_FILE) {
        match parse_file(&raw) {
            Ok(file_cfg) => apply_file(&mut settings, &file_cfg),
            Err(error) => warn!(file = CONFIG_FILE, %error, "ignoring unreadable config file"),
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Reads a flat table of keys. Scalars are taken as text, arrays are joined
/// with commas.
pub fn parse_file(raw: &str) -> Result<HashMap<String, String>, toml::de::Error> {
    let table: toml::Table = toml::from_str(raw)?;
    Ok(table
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(text) => text,
                toml::Value::Array(items) => items
                    .iter()
                    .map(|item| item.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

pub fn apply_file(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    for (key, value) in file_cfg {
        if !apply(settings, key, value) {
            warn!(%key, "unknown config key");
        }
    }
}

pub fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(port) = lookup("PORT") {
        match port.trim().parse::<u16>() {
            Ok(port) => settings.bind_addr = format!("0.0.0.0:{port}"),
            Err(_) => warn!(%port, "ignoring invalid PORT"),
        }
    }
    for key in KEYS {
        if let Some(value) = lookup(&format!("{ENV_PREFIX}{}", key.to_ascii_uppercase())) {
            apply(settings, key, &value);
        }
    }
}

const KEYS: [&str; 13] = [
    "bind_addr",
    "bridge_url",
    "session_dir",
    "client_id",
    "max_reconnect_attempts",
    "backoff_ms",
    "keepalive_interval_secs",
    "initialize_timeout_secs",
    "destroy_timeout_secs",
    "request_timeout_secs",
    "default_country_code",
    "auth_failure_policy",
    "crash_exit_delay_secs",
];

/// Returns false for unknown keys. Invalid values keep the current setting.
fn apply(settings: &mut Settings, key: &str, value: &str) -> bool {
    let value = value.trim();
    match key {
        "bind_addr" => settings.bind_addr = value.to_string(),
        "bridge_url" => settings.bridge_url = value.to_string(),
        "session_dir" => settings.session_dir = PathBuf::from(value),
        "client_id" => settings.client_id = value.to_string(),
        "default_country_code" => settings.default_country_code = value.to_string(),
        "max_reconnect_attempts" => {
            if let Some(parsed) = parse_number(key, value) {
                settings.max_reconnect_attempts = parsed;
            }
        }
        "backoff_ms" => {
            let parsed: Result<Vec<u64>, _> = value
                .trim_matches(|c| c == '[' || c == ']')
                .split(',')
                .map(|part| part.trim().parse::<u64>())
                .collect();
            match parsed.map_err(|err| err.to_string()).and_then(|delays| {
                BackoffTable::from_millis(&delays).map_err(|err| err.to_string())
            }) {
                Ok(table) => settings.backoff = table,
                Err(error) => warn!(%key, %value, %error, "ignoring invalid backoff table"),
            }
        }
        "keepalive_interval_secs" => {
            if let Some(secs) = parse_secs(key, value) {
                settings.keepalive_interval = secs;
            }
        }
        "initialize_timeout_secs" => {
            if let Some(secs) = parse_secs(key, value) {
                settings.initialize_timeout = secs;
            }
        }
        "destroy_timeout_secs" => {
            if let Some(secs) = parse_secs(key, value) {
                settings.destroy_timeout = secs;
            }
        }
        "request_timeout_secs" => {
            if let Some(secs) = parse_secs(key, value) {
                settings.request_timeout = secs;
            }
        }
        "crash_exit_delay_secs" => {
            match value.parse::<u64>() {
                Ok(secs) => settings.crash_exit_delay = Duration::from_secs(secs),
                Err(_) => warn!(%key, %value, "ignoring invalid number"),
            }
        }
        "auth_failure_policy" => match value {
            "require_rescan" => settings.auth_failure_policy = AuthFailurePolicy::RequireRescan,
            "reconnect" => settings.auth_failure_policy = AuthFailurePolicy::Reconnect,
            _ => warn!(%key, %value, "expected require_rescan or reconnect"),
        },
        _ => return false,
    }
    true
}

fn parse_number(key: &str, value: &str) -> Option<u32> {
    let parsed = value.parse::<u32>().ok().filter(|parsed| *parsed > 0);
    if parsed.is_none() {
        warn!(%key, %value, "ignoring invalid number");
    }
    parsed
}

/// Zero is rejected: every duration here arms a timer.
fn parse_secs(key: &str, value: &str) -> Option<Duration> {
    parse_number(key, value).map(|secs| Duration::from_secs(u64::from(secs)))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
