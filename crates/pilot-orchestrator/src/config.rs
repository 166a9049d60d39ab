use crate::error::ConfigError;
use crate::lifecycle::Timings;
use crate::log_buffer::DEFAULT_LOG_CAPACITY;
use crate::subscription::PumpSettings;
use pilot_core::DEFAULT_MAX_FRAME_BYTES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8686";
pub const DEFAULT_COMPANION_URL: &str = "{server}/strategy/{id}/live";
pub const DEFAULT_LOG_DIR: &str = ".pilot/logs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub server_url: String,
    pub log_capacity: usize,
    pub dismiss_delay_ms: u64,
    pub window_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub reconnect_max_ms: u64,
    pub max_frame_bytes: usize,
    pub desktop_host_socket: Option<PathBuf>,
    pub companion_url: String,
    pub log_dir: PathBuf,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            dismiss_delay_ms: 2_000,
            window_delay_ms: 300,
            request_timeout_ms: 10_000,
            reconnect_max_ms: 10_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            desktop_host_socket: None,
            companion_url: DEFAULT_COMPANION_URL.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

impl PilotConfig {
    /// Reads a TOML config file. A missing file yields `None`.
    pub fn load_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&contents)
            .map(Some)
            .map_err(|err| ConfigError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })
    }

    /// Server base URL with a trailing slash so relative joins keep any
    /// path prefix.
    pub fn server_base(&self) -> Result<Url, ConfigError> {
        let mut raw = self.server_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw).map_err(|err| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            message: err.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::InvalidUrl {
                url: self.server_url.clone(),
                message: format!("unsupported scheme '{other}'"),
            }),
        }
    }

    /// Shared client for control requests and the event stream. Only the
    /// connect phase is bounded; per-request timeouts are set by callers.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .connect_timeout(self.request_timeout())
            .build()
            .map_err(|err| ConfigError::Client(err.to_string()))
    }

    pub fn timings(&self) -> Timings {
        Timings {
            dismiss_dialog: Duration::from_millis(self.dismiss_delay_ms),
            open_window: Duration::from_millis(self.window_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn pump_settings(&self) -> PumpSettings {
        PumpSettings {
            max_frame_bytes: self.max_frame_bytes.max(1),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms.max(1)),
        }
    }
}
