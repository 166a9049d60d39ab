use pilot_core::{LogEnvelope, StrategyId};
use serde::Serialize;
use std::fmt;

/// Remote failure details surfaced to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub strategy_id: StrategyId,
    pub error_code: Option<String>,
    pub error_code_chain: Vec<String>,
    pub message: String,
    pub node: Option<String>,
}

impl FailureReport {
    pub fn from_envelope(envelope: &LogEnvelope) -> Self {
        match envelope {
            LogEnvelope::Strategy(record) => Self {
                strategy_id: record.strategy_id,
                error_code: record.error_code.clone(),
                error_code_chain: record.error_code_chain.clone().unwrap_or_default(),
                message: record.message.clone(),
                node: None,
            },
            LogEnvelope::Node(record) => Self {
                strategy_id: record.strategy_id,
                error_code: record.error_code.clone(),
                error_code_chain: Vec::new(),
                message: record.message.clone(),
                node: Some(if record.node_name.is_empty() {
                    record.node_id.clone()
                } else {
                    format!("{} ({})", record.node_name, record.node_id)
                }),
            },
        }
    }

    pub fn transport(strategy_id: StrategyId, message: impl Into<String>) -> Self {
        Self::local(strategy_id, "TRANSPORT_ERROR", message)
    }

    pub fn local(
        strategy_id: StrategyId,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            strategy_id,
            error_code: Some(code.into()),
            error_code_chain: Vec::new(),
            message: message.into(),
            node: None,
        }
    }

    /// Plain-text rendering meant to be pasted into a support request.
    pub fn copy_text(&self) -> String {
        let mut lines = vec![format!("strategy {} failed", self.strategy_id)];
        if let Some(code) = self.error_code.as_deref() {
            lines.push(format!("error code: {code}"));
        }
        if !self.error_code_chain.is_empty() {
            lines.push(format!("error chain: {}", self.error_code_chain.join(" -> ")));
        }
        if let Some(node) = self.node.as_deref() {
            lines.push(format!("node: {node}"));
        }
        if !self.message.is_empty() {
            lines.push(format!("message: {}", self.message));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoticeLevel::Success => "success",
            NoticeLevel::Info => "info",
            NoticeLevel::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub strategy_id: Option<StrategyId>,
    pub message: String,
    pub failure: Option<FailureReport>,
}

impl Notice {
    pub fn success(strategy_id: StrategyId, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            strategy_id: Some(strategy_id),
            message: message.into(),
            failure: None,
        }
    }

    pub fn info(strategy_id: Option<StrategyId>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            strategy_id,
            message: message.into(),
            failure: None,
        }
    }

    pub fn error(strategy_id: Option<StrategyId>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            strategy_id,
            message: message.into(),
            failure: None,
        }
    }

    pub fn failure(report: FailureReport) -> Self {
        Self {
            level: NoticeLevel::Error,
            strategy_id: Some(report.strategy_id),
            message: report.copy_text(),
            failure: Some(report),
        }
    }
}

/// Fire-and-forget user notification sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}
