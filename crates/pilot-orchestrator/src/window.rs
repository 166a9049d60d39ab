use crate::config::PilotConfig;
use crate::error::WindowError;
use async_trait::async_trait;
use pilot_core::StrategyId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Opens the separate execution surface for a running strategy.
#[async_trait]
pub trait CompanionWindow: Send + Sync {
    async fn open(&self, strategy_id: StrategyId) -> Result<(), WindowError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest {
    OpenWindow { strategy_id: StrategyId, url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReply {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Asks the desktop host process, over its control socket, to create a new
/// top-level window.
pub struct DesktopHostWindow {
    socket: PathBuf,
    url_template: String,
    server_url: String,
}

impl DesktopHostWindow {
    pub fn new(socket: PathBuf, server_url: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            socket,
            url_template: url_template.into(),
            server_url: server_url.into(),
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl CompanionWindow for DesktopHostWindow {
    async fn open(&self, strategy_id: StrategyId) -> Result<(), WindowError> {
        use pilot_core::{decode_frame, encode_frame, DEFAULT_MAX_FRAME_BYTES};
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::UnixStream;

        let request = HostRequest::OpenWindow {
            strategy_id,
            url: render_companion_url(&self.url_template, &self.server_url, strategy_id),
        };
        let frame = encode_frame(&request, DEFAULT_MAX_FRAME_BYTES)
            .map_err(|err| WindowError::Host(err.to_string()))?;

        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|err| WindowError::Host(format!("{}: {err}", self.socket.display())))?;
        let (reader_half, mut writer_half) = stream.into_split();
        writer_half
            .write_all(&frame)
            .await
            .map_err(|err| WindowError::Host(err.to_string()))?;
        writer_half
            .flush()
            .await
            .map_err(|err| WindowError::Host(err.to_string()))?;

        let mut line = String::new();
        BufReader::new(reader_half)
            .read_line(&mut line)
            .await
            .map_err(|err| WindowError::Host(err.to_string()))?;
        let reply: HostReply = decode_frame(line.as_bytes(), DEFAULT_MAX_FRAME_BYTES)
            .map_err(|err| WindowError::Host(err.to_string()))?;
        if !reply.ok {
            return Err(WindowError::Host(
                reply.error.unwrap_or_else(|| "request rejected".to_string()),
            ));
        }
        info!(event = "companion_window_opened", strategy_id = %strategy_id, via = "desktop_host");
        Ok(())
    }
}

#[cfg(not(unix))]
#[async_trait]
impl CompanionWindow for DesktopHostWindow {
    async fn open(&self, _strategy_id: StrategyId) -> Result<(), WindowError> {
        Err(WindowError::Host(format!(
            "desktop host socket {} is not supported on this platform",
            self.socket.display()
        )))
    }
}

/// Falls back to the system browser when no desktop host is present.
pub struct BrowserTabWindow {
    url_template: String,
    server_url: String,
}

impl BrowserTabWindow {
    pub fn new(server_url: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl CompanionWindow for BrowserTabWindow {
    async fn open(&self, strategy_id: StrategyId) -> Result<(), WindowError> {
        let url = render_companion_url(&self.url_template, &self.server_url, strategy_id);
        let mut command = browser_command(&url);
        let status = command
            .status()
            .await
            .map_err(|err| WindowError::Launch(err.to_string()))?;
        if !status.success() {
            return Err(WindowError::Launch(format!("launcher exited with {status}")));
        }
        info!(event = "companion_window_opened", strategy_id = %strategy_id, via = "browser", url = %url);
        Ok(())
    }
}

fn browser_command(url: &str) -> tokio::process::Command {
    let mut command = if cfg!(target_os = "macos") {
        tokio::process::Command::new("open")
    } else if cfg!(windows) {
        let mut command = tokio::process::Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        tokio::process::Command::new("xdg-open")
    };
    command.arg(url);
    command.stdin(std::process::Stdio::null());
    command.stdout(std::process::Stdio::null());
    command.stderr(std::process::Stdio::null());
    command
}

pub fn render_companion_url(template: &str, server_url: &str, strategy_id: StrategyId) -> String {
    template
        .replace("{server}", server_url.trim_end_matches('/'))
        .replace("{id}", &strategy_id.to_string())
}

pub fn companion_window_for(config: &PilotConfig) -> Arc<dyn CompanionWindow> {
    match config.desktop_host_socket.as_ref() {
        Some(socket) => Arc::new(DesktopHostWindow::new(
            socket.clone(),
            config.server_url.clone(),
            config.companion_url.clone(),
        )),
        None => Arc::new(BrowserTabWindow::new(
            config.server_url.clone(),
            config.companion_url.clone(),
        )),
    }
}
