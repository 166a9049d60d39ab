use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Identifier of one remote strategy process. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrategyId(u64);

impl StrategyId {
    pub fn new(raw: u64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StrategyId {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let raw = input
            .trim()
            .parse::<u64>()
            .map_err(|err| format!("invalid strategy id '{input}': {err}"))?;
        StrategyId::new(raw).ok_or_else(|| format!("strategy id must be positive: {input}"))
    }
}

impl Serialize for StrategyId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for StrategyId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StrategyIdVisitor;

        impl<'de> Visitor<'de> for StrategyIdVisitor {
            type Value = StrategyId;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a positive strategy id as integer or string")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                StrategyId::new(value)
                    .ok_or_else(|| E::custom(format!("strategy id must be positive: {value}")))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(E::custom(format!("strategy id cannot be negative: {value}")));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value.parse::<StrategyId>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(StrategyIdVisitor)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[serde(alias = "debug")]
    Debug,
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "warn", alias = "WARNING", alias = "warning")]
    Warn,
    #[serde(alias = "error")]
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle stage reported by the remote process for the whole strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StrategyRunState {
    Created,
    Checking,
    CheckPassed,
    Initializing,
    Ready,
    Running,
    Stopping,
    Stopped,
    Failed,
    #[serde(other)]
    Unknown,
}

impl StrategyRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyRunState::Created => "Created",
            StrategyRunState::Checking => "Checking",
            StrategyRunState::CheckPassed => "CheckPassed",
            StrategyRunState::Initializing => "Initializing",
            StrategyRunState::Ready => "Ready",
            StrategyRunState::Running => "Running",
            StrategyRunState::Stopping => "Stopping",
            StrategyRunState::Stopped => "Stopped",
            StrategyRunState::Failed => "Failed",
            StrategyRunState::Unknown => "Unknown",
        }
    }

    /// Stages the remote emits while it is still preparing the run.
    pub fn is_preparing(&self) -> bool {
        matches!(
            self,
            StrategyRunState::Checking
                | StrategyRunState::CheckPassed
                | StrategyRunState::Initializing
        )
    }
}

/// Lifecycle stage reported for a single node of the strategy graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeRunState {
    Created,
    Checking,
    CheckPassed,
    Initializing,
    Ready,
    Running,
    Stopping,
    Stopped,
    Failed,
    #[serde(other)]
    Unknown,
}

impl NodeRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRunState::Created => "Created",
            NodeRunState::Checking => "Checking",
            NodeRunState::CheckPassed => "CheckPassed",
            NodeRunState::Initializing => "Initializing",
            NodeRunState::Ready => "Ready",
            NodeRunState::Running => "Running",
            NodeRunState::Stopping => "Stopping",
            NodeRunState::Stopped => "Stopped",
            NodeRunState::Failed => "Failed",
            NodeRunState::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRecord {
    pub strategy_id: StrategyId,
    pub strategy_state: StrategyRunState,
    pub severity: Severity,
    pub timestamp: i64,
    #[serde(default)]
    pub datetime: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub strategy_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code_chain: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub strategy_id: StrategyId,
    pub node_id: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub node_type: String,
    pub node_state: NodeRunState,
    pub severity: Severity,
    pub timestamp: i64,
    #[serde(default)]
    pub datetime: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl NodeRecord {
    /// A node record reporting an error code at ERROR severity fails the run.
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
            && self
                .error_code
                .as_deref()
                .map(|code| !code.trim().is_empty())
                .unwrap_or(false)
    }
}

/// One lifecycle log message pushed by the remote process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEnvelope {
    Strategy(StrategyRecord),
    Node(NodeRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnvelopeKind {
    Strategy,
    Node,
}

/// Identity of an acted-upon transition: `(kind, state, remote timestamp)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub kind: EnvelopeKind,
    pub state: &'static str,
    pub timestamp: i64,
}

impl LogEnvelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            LogEnvelope::Strategy(_) => EnvelopeKind::Strategy,
            LogEnvelope::Node(_) => EnvelopeKind::Node,
        }
    }

    pub fn strategy_id(&self) -> StrategyId {
        match self {
            LogEnvelope::Strategy(record) => record.strategy_id,
            LogEnvelope::Node(record) => record.strategy_id,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            LogEnvelope::Strategy(record) => record.strategy_state.as_str(),
            LogEnvelope::Node(record) => record.node_state.as_str(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            LogEnvelope::Strategy(record) => record.severity,
            LogEnvelope::Node(record) => record.severity,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            LogEnvelope::Strategy(record) => record.timestamp,
            LogEnvelope::Node(record) => record.timestamp,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            LogEnvelope::Strategy(record) => &record.message,
            LogEnvelope::Node(record) => &record.message,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            LogEnvelope::Strategy(record) => record.error_code.as_deref(),
            LogEnvelope::Node(record) => record.error_code.as_deref(),
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            kind: self.kind(),
            state: self.state_name(),
            timestamp: self.timestamp(),
        }
    }

    /// Single-line rendering used by log views and diagnostics.
    pub fn summary(&self) -> String {
        match self {
            LogEnvelope::Strategy(record) => {
                let mut line = format!(
                    "[{}] {} strategy={} state={} {}",
                    record.severity,
                    display_time(&record.datetime, record.timestamp),
                    record.strategy_id,
                    record.strategy_state.as_str(),
                    record.message
                );
                if let Some(code) = record.error_code.as_deref() {
                    line.push_str(&format!(" code={code}"));
                }
                line
            }
            LogEnvelope::Node(record) => {
                let mut line = format!(
                    "[{}] {} node={}({}) state={} {}",
                    record.severity,
                    display_time(&record.datetime, record.timestamp),
                    record.node_name,
                    record.node_id,
                    record.node_state.as_str(),
                    record.message
                );
                if let Some(code) = record.error_code.as_deref() {
                    line.push_str(&format!(" code={code}"));
                }
                line
            }
        }
    }
}

fn display_time(datetime: &str, timestamp: i64) -> String {
    if datetime.trim().is_empty() {
        timestamp.to_string()
    } else {
        datetime.to_string()
    }
}
