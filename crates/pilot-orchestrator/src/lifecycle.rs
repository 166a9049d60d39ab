use crate::notice::{FailureReport, Notice};
use pilot_core::{LogEnvelope, Severity, StrategyRunState};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_DISMISS_DELAY: Duration = Duration::from_millis(2_000);
pub const DEFAULT_WINDOW_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Initializing,
    Ready,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        }
    }

    /// No subscription is open in these states.
    pub fn is_at_rest(&self) -> bool {
        matches!(
            self,
            LifecycleState::Idle | LifecycleState::Stopped | LifecycleState::Failed
        )
    }

    pub fn is_operational(&self) -> bool {
        matches!(self, LifecycleState::Ready | LifecycleState::Running)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    StartRequested,
    RetryRequested,
    StopRequested,
    StopAcknowledged,
    StopRejected(FailureReport),
    Envelope(LogEnvelope),
    TransportError(FailureReport),
}

/// Work deferred through the scheduler and guarded by generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredAction {
    /// Hide the dialog; optionally chain the companion window after a
    /// further delay under the same generation.
    DismissDialog { open_window_after: Option<Duration> },
    OpenCompanionWindow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenSubscription,
    CloseSubscription,
    ClearLog,
    ShowDialog,
    AdvanceGeneration,
    ClearFailure,
    RecordFailure(FailureReport),
    AppendNote {
        state: StrategyRunState,
        severity: Severity,
        message: String,
    },
    Schedule {
        delay: Duration,
        action: DeferredAction,
    },
    CancelScheduled,
    Notify(Notice),
    StopRemote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub dismiss_dialog: Duration,
    pub open_window: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            dismiss_dialog: DEFAULT_DISMISS_DELAY,
            open_window: DEFAULT_WINDOW_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: LifecycleState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(state: LifecycleState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }

    fn to(next: LifecycleState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    pub fn changed_from(&self, previous: LifecycleState) -> bool {
        self.next != previous
    }
}

/// Pure transition function. Events with no matching row leave the state
/// unchanged and authorize no effects.
pub fn transition(state: LifecycleState, event: &LifecycleEvent, timings: &Timings) -> Transition {
    use LifecycleState::*;

    match (state, event) {
        (Idle | Stopped | Failed, LifecycleEvent::StartRequested) => Transition::to(
            Initializing,
            vec![
                Effect::AdvanceGeneration,
                Effect::ClearFailure,
                Effect::ClearLog,
                Effect::ShowDialog,
                Effect::OpenSubscription,
            ],
        ),
        (Failed, LifecycleEvent::RetryRequested) => Transition::to(
            Initializing,
            vec![
                Effect::AdvanceGeneration,
                Effect::ClearFailure,
                Effect::OpenSubscription,
            ],
        ),
        (Ready | Running, LifecycleEvent::StopRequested) => Transition::to(
            Stopping,
            vec![
                Effect::StopRemote,
                Effect::AppendNote {
                    state: StrategyRunState::Stopping,
                    severity: Severity::Info,
                    message: "stop requested".to_string(),
                },
            ],
        ),
        (Stopping, LifecycleEvent::StopAcknowledged) => stopped(),
        (Stopping, LifecycleEvent::StopRejected(report)) => failed(report.clone(), None),
        (Idle, LifecycleEvent::TransportError(_)) => Transition::stay(state),
        (_, LifecycleEvent::TransportError(report)) => failed(
            report.clone(),
            Some(Effect::AppendNote {
                state: StrategyRunState::Failed,
                severity: Severity::Error,
                message: report.message.clone(),
            }),
        ),
        (_, LifecycleEvent::Envelope(envelope)) => on_envelope(state, envelope, timings),
        _ => Transition::stay(state),
    }
}

fn on_envelope(state: LifecycleState, envelope: &LogEnvelope, timings: &Timings) -> Transition {
    use LifecycleState::*;

    match envelope {
        LogEnvelope::Strategy(record) => match (state, record.strategy_state) {
            (Initializing, run_state) if run_state.is_preparing() => Transition::stay(state),
            (Initializing, StrategyRunState::Ready) => {
                let name = if record.strategy_name.is_empty() {
                    format!("strategy {}", record.strategy_id)
                } else {
                    record.strategy_name.clone()
                };
                Transition::to(
                    Running,
                    vec![
                        Effect::Schedule {
                            delay: timings.dismiss_dialog,
                            action: DeferredAction::DismissDialog {
                                open_window_after: Some(timings.open_window),
                            },
                        },
                        Effect::Notify(Notice::success(
                            record.strategy_id,
                            format!("{name} is running"),
                        )),
                    ],
                )
            }
            (Ready, StrategyRunState::Running) => Transition::to(Running, Vec::new()),
            (Initializing | Ready | Running, StrategyRunState::Failed) => {
                failed(FailureReport::from_envelope(envelope), None)
            }
            (Ready | Running | Stopping, StrategyRunState::Stopped) => stopped(),
            _ => Transition::stay(state),
        },
        LogEnvelope::Node(record) => match state {
            Initializing | Ready | Running if record.is_fatal() => {
                failed(FailureReport::from_envelope(envelope), None)
            }
            _ => Transition::stay(state),
        },
    }
}

fn failed(report: FailureReport, note: Option<Effect>) -> Transition {
    let mut effects = Vec::with_capacity(5);
    if let Some(note) = note {
        effects.push(note);
    }
    effects.extend(failure_effects(report));
    Transition::to(LifecycleState::Failed, effects)
}

/// Effects shared by every path into `Failed`.
pub fn failure_effects(report: FailureReport) -> Vec<Effect> {
    vec![
        Effect::CancelScheduled,
        Effect::RecordFailure(report.clone()),
        Effect::Notify(Notice::failure(report)),
        Effect::CloseSubscription,
    ]
}

fn stopped() -> Transition {
    Transition::to(
        LifecycleState::Stopped,
        vec![Effect::CancelScheduled, Effect::CloseSubscription],
    )
}
