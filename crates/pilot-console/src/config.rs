use pilot_orchestrator::{ConfigError, PilotConfig};
use std::env;
use std::path::PathBuf;

/// Values given on the command line. Empty strings mean "not given".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub server_url: String,
    pub log_dir: String,
}

/// Flag, then `PILOT_*` environment, then the TOML file, then defaults.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<PilotConfig, ConfigError> {
    resolve_with(overrides, |key| env::var(key).ok())
}

pub fn resolve_with(
    overrides: &ConfigOverrides,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PilotConfig, ConfigError> {
    let path = overrides
        .config_path
        .clone()
        .or_else(|| non_empty(lookup("PILOT_CONFIG")).map(PathBuf::from))
        .unwrap_or_else(|| default_config_path(&lookup));
    let mut config = PilotConfig::load_file(&path)?.unwrap_or_default();

    apply_env(&mut config, &lookup);

    if !overrides.server_url.trim().is_empty() {
        config.server_url = overrides.server_url.trim().to_string();
    }
    if !overrides.log_dir.trim().is_empty() {
        config.log_dir = PathBuf::from(overrides.log_dir.trim());
    }

    config.server_base()?;
    Ok(config)
}

fn apply_env(config: &mut PilotConfig, lookup: &impl Fn(&str) -> Option<String>) {
    if let Some(value) = non_empty(lookup("PILOT_SERVER_URL")) {
        config.server_url = value;
    }
    if let Some(value) = non_empty(lookup("PILOT_LOG_DIR")) {
        config.log_dir = PathBuf::from(value);
    }
    if let Some(value) = non_empty(lookup("PILOT_DESKTOP_SOCKET")) {
        config.desktop_host_socket = Some(PathBuf::from(value));
    }
    if let Some(value) = non_empty(lookup("PILOT_COMPANION_URL")) {
        config.companion_url = value;
    }
    if let Some(value) = parse_env(lookup, "PILOT_LOG_CAPACITY") {
        config.log_capacity = value;
    }
    if let Some(value) = parse_env(lookup, "PILOT_DISMISS_DELAY_MS") {
        config.dismiss_delay_ms = value;
    }
    if let Some(value) = parse_env(lookup, "PILOT_WINDOW_DELAY_MS") {
        config.window_delay_ms = value;
    }
    if let Some(value) = parse_env(lookup, "PILOT_REQUEST_TIMEOUT_MS") {
        config.request_timeout_ms = value;
    }
    if let Some(value) = parse_env(lookup, "PILOT_RECONNECT_MAX_MS") {
        config.reconnect_max_ms = value;
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = non_empty(lookup(key))?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            eprintln!("ignoring {key}: '{raw}' is not a valid number");
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_config_path(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    config_dir(lookup).join("strategy-pilot").join("config.toml")
}

fn config_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = non_empty(lookup("XDG_CONFIG_HOME")) {
        return PathBuf::from(path);
    }
    home_dir(lookup).join(".config")
}

fn home_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    non_empty(lookup("HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn env_true(key: &str) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
