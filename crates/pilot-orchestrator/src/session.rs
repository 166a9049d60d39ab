use crate::dedup::DedupLedger;
use crate::lifecycle::{failure_effects, transition, Effect, LifecycleEvent, LifecycleState, Timings};
use crate::log_buffer::LogBuffer;
use crate::notice::{FailureReport, Notice, NoticeLevel};
use pilot_core::{LogEnvelope, Severity, StrategyId, StrategyRecord, StrategyRunState};
use serde::Serialize;
use tracing::{debug, info};

/// Read-only snapshot handed to every UI surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub strategy_id: Option<StrategyId>,
    pub strategy_name: Option<String>,
    pub lifecycle: LifecycleState,
    pub is_initializing: bool,
    pub is_running: bool,
    pub is_backtesting: bool,
    pub is_failed: bool,
    pub dialog_visible: bool,
    pub subscription_active: bool,
    pub generation: u64,
    /// Newest first.
    pub log: Vec<LogEnvelope>,
    /// Lifetime count of log pushes; the difference between two views is
    /// the number of new entries at the head of `log`.
    pub log_pushed: u64,
    pub failure: Option<FailureReport>,
}

impl Default for SessionView {
    fn default() -> Self {
        SessionStore::default().view()
    }
}

/// Holds the single session. Mutators apply internal effects in place and
/// return the effects that must be carried out by the caller.
#[derive(Debug, Clone)]
pub struct SessionStore {
    strategy_id: Option<StrategyId>,
    strategy_name: Option<String>,
    lifecycle: LifecycleState,
    log: LogBuffer,
    ledger: DedupLedger,
    dialog_visible: bool,
    subscription_active: bool,
    generation: u64,
    failure: Option<FailureReport>,
    timings: Timings,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(LogBuffer::default().capacity(), Timings::default())
    }
}

impl SessionStore {
    pub fn new(log_capacity: usize, timings: Timings) -> Self {
        Self {
            strategy_id: None,
            strategy_name: None,
            lifecycle: LifecycleState::Idle,
            log: LogBuffer::new(log_capacity),
            ledger: DedupLedger::new(),
            dialog_visible: false,
            subscription_active: false,
            generation: 0,
            failure: None,
            timings,
        }
    }

    pub fn strategy_id(&self) -> Option<StrategyId> {
        self.strategy_id
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn current_generation(&self) -> u64 {
        self.generation
    }

    pub fn dialog_visible(&self) -> bool {
        self.dialog_visible
    }

    pub fn subscription_active(&self) -> bool {
        self.subscription_active
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        self.failure.as_ref()
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn is_initializing(&self) -> bool {
        self.lifecycle == LifecycleState::Initializing
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == LifecycleState::Running
    }

    pub fn is_backtesting(&self) -> bool {
        matches!(
            self.lifecycle,
            LifecycleState::Ready | LifecycleState::Running | LifecycleState::Stopping
        )
    }

    pub fn is_failed(&self) -> bool {
        self.lifecycle == LifecycleState::Failed
    }

    /// Opens a session for `strategy_id`. Ignored unless the current session
    /// is at rest.
    pub fn start_session(&mut self, strategy_id: StrategyId) -> Vec<Effect> {
        if !self.lifecycle.is_at_rest() {
            debug!(
                event = "start_ignored",
                strategy_id = %strategy_id,
                state = %self.lifecycle
            );
            return Vec::new();
        }
        self.strategy_id = Some(strategy_id);
        self.strategy_name = None;
        self.step(LifecycleEvent::StartRequested)
    }

    pub fn retry(&mut self) -> Vec<Effect> {
        if self.strategy_id.is_none() {
            return Vec::new();
        }
        self.step(LifecycleEvent::RetryRequested)
    }

    pub fn request_stop(&mut self) -> Vec<Effect> {
        if self.strategy_id.is_none() {
            return Vec::new();
        }
        self.step(LifecycleEvent::StopRequested)
    }

    pub fn acknowledge_stop(&mut self) -> Vec<Effect> {
        self.step(LifecycleEvent::StopAcknowledged)
    }

    pub fn reject_stop(&mut self, message: impl Into<String>) -> Vec<Effect> {
        let Some(strategy_id) = self.strategy_id else {
            return Vec::new();
        };
        let report = FailureReport::local(strategy_id, "STOP_FAILED", message);
        self.step(LifecycleEvent::StopRejected(report))
    }

    /// Records the envelope for display, then lets it drive the state machine
    /// only if its transition key has not been seen this generation.
    pub fn apply_envelope(&mut self, envelope: LogEnvelope) -> Vec<Effect> {
        if self.strategy_id != Some(envelope.strategy_id()) {
            debug!(
                event = "envelope_foreign",
                strategy_id = %envelope.strategy_id(),
                active = ?self.strategy_id.map(StrategyId::get)
            );
            return Vec::new();
        }

        self.log.push(envelope.clone());
        if !self.ledger.accept(&envelope) {
            debug!(
                event = "envelope_duplicate",
                strategy_id = %envelope.strategy_id(),
                state = envelope.state_name(),
                timestamp = envelope.timestamp()
            );
            return Vec::new();
        }

        if let LogEnvelope::Strategy(record) = &envelope {
            if !record.strategy_name.is_empty() {
                self.strategy_name = Some(record.strategy_name.clone());
            }
        }
        self.step(LifecycleEvent::Envelope(envelope))
    }

    pub fn apply_transport_error(&mut self, message: impl Into<String>) -> Vec<Effect> {
        let Some(strategy_id) = self.strategy_id else {
            return Vec::new();
        };
        let report = FailureReport::transport(strategy_id, message);
        self.step(LifecycleEvent::TransportError(report))
    }

    pub fn set_dialog_visible(&mut self, visible: bool) {
        self.dialog_visible = visible;
    }

    pub fn set_subscription_active(&mut self, active: bool) {
        self.subscription_active = active;
    }

    /// Forces the session into `Failed`. A no-op when already failed.
    pub fn mark_failed(&mut self, report: FailureReport) -> Vec<Effect> {
        if self.lifecycle == LifecycleState::Failed {
            return Vec::new();
        }
        if self.strategy_id.is_none() {
            self.strategy_id = Some(report.strategy_id);
        }
        let previous = self.lifecycle;
        self.lifecycle = LifecycleState::Failed;
        self.log_transition(previous);

        let mut effects = vec![Effect::AppendNote {
            state: StrategyRunState::Failed,
            severity: Severity::Error,
            message: report.message.clone(),
        }];
        effects.extend(failure_effects(report));
        self.absorb(effects)
    }

    /// Writes a notice into the session log so the dialog shows it. A
    /// failure notice received while already failed replaces the report.
    pub fn record_notice(&mut self, notice: &Notice) {
        if let Some(report) = notice.failure.as_ref().filter(|_| self.is_failed()) {
            self.failure = Some(report.clone());
        }
        let severity = match notice.level {
            NoticeLevel::Error => Severity::Error,
            NoticeLevel::Success | NoticeLevel::Info => Severity::Info,
        };
        self.append_note(self.run_state(), severity, notice.message.clone());
    }

    /// Resets to `Idle`. The caller closes the subscription before calling
    /// this so no in-flight envelope meets an already-cleared ledger.
    pub fn end_session(&mut self) -> bool {
        if self.lifecycle == LifecycleState::Idle && self.strategy_id.is_none() {
            return false;
        }
        let previous = self.lifecycle;
        self.lifecycle = LifecycleState::Idle;
        self.log_transition(previous);

        self.subscription_active = false;
        self.dialog_visible = false;
        self.ledger.clear();
        self.log.clear();
        self.failure = None;
        self.strategy_id = None;
        self.strategy_name = None;
        true
    }

    /// Adopts a remotely observed state without replaying the start path.
    /// Only applies while at rest.
    pub fn adopt(&mut self, strategy_id: StrategyId, state: LifecycleState) -> Vec<Effect> {
        if !self.lifecycle.is_at_rest() {
            return Vec::new();
        }
        self.generation += 1;
        self.ledger.clear();
        self.log.clear();
        self.strategy_id = Some(strategy_id);
        self.strategy_name = None;
        self.dialog_visible = false;
        self.failure = match state {
            LifecycleState::Failed => Some(FailureReport::local(
                strategy_id,
                "REMOTE_FAILED",
                "remote reports the strategy as failed",
            )),
            _ => None,
        };

        let previous = self.lifecycle;
        self.lifecycle = state;
        self.log_transition(previous);

        if state.is_at_rest() {
            Vec::new()
        } else {
            self.absorb(vec![Effect::OpenSubscription])
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            strategy_id: self.strategy_id,
            strategy_name: self.strategy_name.clone(),
            lifecycle: self.lifecycle,
            is_initializing: self.is_initializing(),
            is_running: self.is_running(),
            is_backtesting: self.is_backtesting(),
            is_failed: self.is_failed(),
            dialog_visible: self.dialog_visible,
            subscription_active: self.subscription_active,
            generation: self.generation,
            log: self.log.to_vec(),
            log_pushed: self.log.pushed(),
            failure: self.failure.clone(),
        }
    }

    fn step(&mut self, event: LifecycleEvent) -> Vec<Effect> {
        let previous = self.lifecycle;
        let outcome = transition(previous, &event, &self.timings);
        self.lifecycle = outcome.next;
        if outcome.changed_from(previous) {
            self.log_transition(previous);
        }
        self.absorb(outcome.effects)
    }

    fn log_transition(&self, previous: LifecycleState) {
        info!(
            event = "lifecycle_transition",
            strategy_id = ?self.strategy_id.map(StrategyId::get),
            generation = self.generation,
            from = %previous,
            state = %self.lifecycle
        );
    }

    fn absorb(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
        let mut outward = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                Effect::AdvanceGeneration => {
                    self.generation += 1;
                    self.ledger.clear();
                }
                Effect::ClearLog => self.log.clear(),
                Effect::ShowDialog => self.dialog_visible = true,
                Effect::ClearFailure => self.failure = None,
                Effect::RecordFailure(report) => self.failure = Some(report),
                Effect::AppendNote {
                    state,
                    severity,
                    message,
                } => self.append_note(state, severity, message),
                Effect::OpenSubscription => {
                    self.subscription_active = true;
                    outward.push(Effect::OpenSubscription);
                }
                Effect::CloseSubscription => {
                    self.subscription_active = false;
                    outward.push(Effect::CloseSubscription);
                }
                other => outward.push(other),
            }
        }
        outward
    }

    fn run_state(&self) -> StrategyRunState {
        match self.lifecycle {
            LifecycleState::Idle => StrategyRunState::Created,
            LifecycleState::Initializing => StrategyRunState::Initializing,
            LifecycleState::Ready => StrategyRunState::Ready,
            LifecycleState::Running => StrategyRunState::Running,
            LifecycleState::Stopping => StrategyRunState::Stopping,
            LifecycleState::Stopped => StrategyRunState::Stopped,
            LifecycleState::Failed => StrategyRunState::Failed,
        }
    }

    fn append_note(&mut self, state: StrategyRunState, severity: Severity, message: String) {
        let Some(strategy_id) = self.strategy_id else {
            return;
        };
        let now = chrono::Utc::now();
        self.log.push(LogEnvelope::Strategy(StrategyRecord {
            strategy_id,
            strategy_state: state,
            severity,
            timestamp: now.timestamp_millis(),
            datetime: now.to_rfc3339(),
            message,
            strategy_name: self.strategy_name.clone().unwrap_or_default(),
            error_code: None,
            error_code_chain: None,
        }));
    }
}
