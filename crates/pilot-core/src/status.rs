use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Point-in-time status the remote reports for a strategy process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Stopped,
    Initializing,
    Running,
    Playing,
    Pausing,
    Ready,
    Failed,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Stopped => "stopped",
            RemoteStatus::Initializing => "initializing",
            RemoteStatus::Running => "running",
            RemoteStatus::Playing => "playing",
            RemoteStatus::Pausing => "pausing",
            RemoteStatus::Ready => "ready",
            RemoteStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "stopped" => Ok(RemoteStatus::Stopped),
            "initializing" => Ok(RemoteStatus::Initializing),
            "running" => Ok(RemoteStatus::Running),
            "playing" => Ok(RemoteStatus::Playing),
            "pausing" | "paused" => Ok(RemoteStatus::Pausing),
            "ready" => Ok(RemoteStatus::Ready),
            "failed" => Ok(RemoteStatus::Failed),
            other => Err(format!("Unknown remote status: {other}")),
        }
    }
}

/// Body of `GET status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: RemoteStatus,
}
