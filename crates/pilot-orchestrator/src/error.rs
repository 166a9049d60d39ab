use pilot_core::StrategyId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("strategy {0} is already running")]
    Conflict(StrategyId),
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("response decode failed: {0}")]
    Decode(String),
}

impl ControlError {
    /// Short machine code carried into failure reports.
    pub fn code(&self) -> String {
        match self {
            ControlError::Conflict(_) => "CONFLICT".to_string(),
            ControlError::Status { status, .. } => format!("HTTP_{status}"),
            ControlError::Request(_) => "REQUEST_FAILED".to_string(),
            ControlError::Decode(_) => "DECODE_FAILED".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("event stream returned {0}")]
    Status(u16),
    #[error("event stream broke: {0}")]
    Stream(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("desktop host refused window: {0}")]
    Host(String),
    #[error("failed to launch browser tab: {0}")]
    Launch(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("invalid server url '{url}': {message}")]
    InvalidUrl { url: String, message: String },
    #[error("failed to build http client: {0}")]
    Client(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("orchestrator is no longer running")]
pub struct OrchestratorClosed;
