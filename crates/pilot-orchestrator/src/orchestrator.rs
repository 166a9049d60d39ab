use crate::config::PilotConfig;
use crate::control::{classify_init, ControlApi, HttpControl, InitOutcome};
use crate::error::{ConfigError, ControlError, OrchestratorClosed, WindowError};
use crate::lifecycle::{DeferredAction, Effect, LifecycleState, Timings};
use crate::log_buffer::DEFAULT_LOG_CAPACITY;
use crate::notice::{FailureReport, Notice, Notifier};
use crate::scheduler::EffectScheduler;
use crate::session::{SessionStore, SessionView};
use crate::subscription::{
    LinkId, PumpSettings, SubscriptionHandle, SubscriptionManager, TransportEvent,
};
use crate::transport::{EventTransport, HttpEventTransport};
use crate::window::{companion_window_for, CompanionWindow};
use pilot_core::{RemoteStatus, StrategyId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 64;
const INBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(StrategyId),
    Retry,
    Run,
    Stop,
    SetDialogVisible(bool),
    Reconcile(StrategyId),
    EndSession,
    Shutdown,
}

/// Results of work the loop spawned off.
#[derive(Debug)]
pub enum Inbound {
    StopResolved {
        strategy_id: StrategyId,
        generation: u64,
        result: Result<(), ControlError>,
    },
    WindowOpened {
        strategy_id: StrategyId,
        generation: u64,
        result: Result<(), WindowError>,
    },
}

pub struct Collaborators {
    pub control: Arc<dyn ControlApi>,
    pub transport: Arc<dyn EventTransport>,
    pub notifier: Arc<dyn Notifier>,
    pub window: Arc<dyn CompanionWindow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub log_capacity: usize,
    pub timings: Timings,
    pub pump: PumpSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            timings: Timings::default(),
            pump: PumpSettings::default(),
        }
    }
}

impl From<&PilotConfig> for OrchestratorSettings {
    fn from(config: &PilotConfig) -> Self {
        Self {
            log_capacity: config.log_capacity,
            timings: config.timings(),
            pump: config.pump_settings(),
        }
    }
}

/// Cloneable front door used by every UI surface.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    views: watch::Receiver<SessionView>,
}

impl OrchestratorHandle {
    pub async fn send(&self, command: Command) -> Result<(), OrchestratorClosed> {
        self.commands
            .send(command)
            .await
            .map_err(|_| OrchestratorClosed)
    }

    pub async fn start(&self, strategy_id: StrategyId) -> Result<(), OrchestratorClosed> {
        self.send(Command::Start(strategy_id)).await
    }

    pub async fn retry(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::Retry).await
    }

    pub async fn run(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::Run).await
    }

    pub async fn stop(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::Stop).await
    }

    pub async fn set_dialog_visible(&self, visible: bool) -> Result<(), OrchestratorClosed> {
        self.send(Command::SetDialogVisible(visible)).await
    }

    pub async fn reconcile(&self, strategy_id: StrategyId) -> Result<(), OrchestratorClosed> {
        self.send(Command::Reconcile(strategy_id)).await
    }

    pub async fn end_session(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::EndSession).await
    }

    pub async fn shutdown(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::Shutdown).await
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.views.clone()
    }

    pub fn view(&self) -> SessionView {
        self.views.borrow().clone()
    }
}

/// Owns the session and every collaborator. All mutation happens on the task
/// that drives [`Orchestrator::run`].
pub struct Orchestrator {
    store: SessionStore,
    subscriptions: SubscriptionManager,
    subscription: Option<SubscriptionHandle>,
    scheduler: EffectScheduler,
    control: Arc<dyn ControlApi>,
    notifier: Arc<dyn Notifier>,
    window: Arc<dyn CompanionWindow>,
    commands: mpsc::Receiver<Command>,
    transport_events: mpsc::Receiver<TransportEvent>,
    inbox: mpsc::Receiver<Inbound>,
    inbox_tx: mpsc::Sender<Inbound>,
    views: watch::Sender<SessionView>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        collaborators: Collaborators,
    ) -> (Self, OrchestratorHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::channel(INBOX_CAPACITY);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let store = SessionStore::new(settings.log_capacity, settings.timings);
        let (view_tx, view_rx) = watch::channel(store.view());

        let orchestrator = Self {
            store,
            subscriptions: SubscriptionManager::new(
                collaborators.transport,
                transport_tx,
                settings.pump,
            ),
            subscription: None,
            scheduler: EffectScheduler::new(),
            control: collaborators.control,
            notifier: collaborators.notifier,
            window: collaborators.window,
            commands: command_rx,
            transport_events: transport_rx,
            inbox: inbox_rx,
            inbox_tx,
            views: view_tx,
        };
        let handle = OrchestratorHandle {
            commands: command_tx,
            views: view_rx,
        };
        (orchestrator, handle)
    }

    /// Wires the HTTP control client, the HTTP event stream and the
    /// configured companion window.
    pub fn with_http(
        config: &PilotConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(Self, OrchestratorHandle), ConfigError> {
        let collaborators = Collaborators {
            control: Arc::new(HttpControl::from_config(config)?),
            transport: Arc::new(HttpEventTransport::new(
                config.http_client()?,
                config.server_base()?,
            )),
            notifier,
            window: companion_window_for(config),
        };
        Ok(Self::new(OrchestratorSettings::from(config), collaborators))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn active_link(&self) -> Option<LinkId> {
        self.subscription.map(|handle| handle.link)
    }

    pub async fn run(mut self) {
        info!(event = "orchestrator_started");
        loop {
            let next_due = self.scheduler.next_due();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.transport_events.recv() => self.handle_transport(event),
                Some(inbound) = self.inbox.recv() => self.handle_inbound(inbound),
                _ = wait_until(next_due) => self.fire_due(Instant::now()),
            }
            self.publish();
        }
        self.shutdown();
    }

    pub async fn handle_command(&mut self, command: Command) {
        debug!(event = "command_received", command = ?command);
        match command {
            Command::Start(strategy_id) => self.start(strategy_id).await,
            Command::Retry => self.retry().await,
            Command::Run => self.run_strategy(),
            Command::Stop => self.stop(),
            Command::SetDialogVisible(visible) => self.store.set_dialog_visible(visible),
            Command::Reconcile(strategy_id) => self.reconcile(strategy_id).await,
            Command::EndSession => self.end_session(),
            Command::Shutdown => self.shutdown(),
        }
    }

    async fn start(&mut self, strategy_id: StrategyId) {
        let current = self.store.lifecycle();
        if !current.is_at_rest() {
            let active = self
                .store
                .strategy_id()
                .map(|id| id.to_string())
                .unwrap_or_default();
            info!(event = "start_rejected", strategy_id = %strategy_id, state = %current);
            self.notify_outcome(Notice::info(
                Some(strategy_id),
                format!("strategy {active} is still {current}"),
            ));
            return;
        }

        match classify_init(self.control.initialize(strategy_id).await) {
            InitOutcome::Started => {
                let effects = self.store.start_session(strategy_id);
                self.execute(effects);
            }
            InitOutcome::AlreadyRunning => {
                info!(event = "init_conflict", strategy_id = %strategy_id);
                self.notify_outcome(Notice::info(
                    Some(strategy_id),
                    format!("strategy {strategy_id} is already running"),
                ));
            }
            InitOutcome::Failed(err) => {
                warn!(event = "init_failed", strategy_id = %strategy_id, error = %err);
                if self.store.lifecycle() != LifecycleState::Idle {
                    self.scheduler.cancel_all();
                    self.store.end_session();
                }
                let report = FailureReport::local(strategy_id, err.code(), err.to_string());
                let effects = self.store.mark_failed(report);
                self.execute(effects);
            }
        }
    }

    async fn retry(&mut self) {
        let (Some(strategy_id), LifecycleState::Failed) =
            (self.store.strategy_id(), self.store.lifecycle())
        else {
            debug!(event = "retry_ignored", state = %self.store.lifecycle());
            return;
        };

        match classify_init(self.control.initialize(strategy_id).await) {
            InitOutcome::Started | InitOutcome::AlreadyRunning => {
                let effects = self.store.retry();
                self.execute(effects);
            }
            InitOutcome::Failed(err) => {
                warn!(event = "retry_failed", strategy_id = %strategy_id, error = %err);
                self.notify_outcome(Notice::failure(FailureReport::local(
                    strategy_id,
                    err.code(),
                    err.to_string(),
                )));
            }
        }
    }

    fn run_strategy(&mut self) {
        let Some(strategy_id) = self.store.strategy_id() else {
            return;
        };
        if !self.store.lifecycle().is_operational() {
            debug!(event = "run_ignored", strategy_id = %strategy_id, state = %self.store.lifecycle());
            return;
        }
        let control = Arc::clone(&self.control);
        tokio::spawn(async move {
            if let Err(err) = control.run(strategy_id).await {
                warn!(event = "run_request_failed", strategy_id = %strategy_id, error = %err);
            }
        });
    }

    fn stop(&mut self) {
        let effects = self.store.request_stop();
        if effects.is_empty() {
            debug!(event = "stop_ignored", state = %self.store.lifecycle());
        }
        self.execute(effects);
    }

    async fn reconcile(&mut self, strategy_id: StrategyId) {
        if !self.store.lifecycle().is_at_rest() {
            debug!(event = "reconcile_skipped", strategy_id = %strategy_id, state = %self.store.lifecycle());
            return;
        }
        let status = match self.control.query_status(strategy_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(event = "reconcile_failed", strategy_id = %strategy_id, error = %err);
                return;
            }
        };
        info!(event = "reconcile_status", strategy_id = %strategy_id, status = %status);
        if let Some(state) = adopted_state(status) {
            let effects = self.store.adopt(strategy_id, state);
            self.execute(effects);
        }
    }

    /// Closes the transport before the ledger is cleared.
    fn end_session(&mut self) {
        if let Some(handle) = self.subscription.take() {
            self.subscriptions.close(&handle);
        }
        self.store.set_subscription_active(false);
        let cancelled = self.scheduler.cancel_all();
        if self.store.end_session() {
            info!(event = "session_ended", cancelled);
        }
    }

    fn shutdown(&mut self) {
        self.end_session();
        self.subscriptions.close_all();
        info!(event = "orchestrator_stopped");
    }

    pub fn handle_transport(&mut self, event: TransportEvent) {
        let link = event.link();
        if self.active_link() != Some(link) || !self.subscriptions.is_live(link) {
            debug!(event = "transport_event_stale", link = %link);
            return;
        }

        match event {
            TransportEvent::Envelope { envelope, .. } => {
                let effects = self.store.apply_envelope(envelope);
                self.execute(effects);
            }
            TransportEvent::Malformed { error, .. } => {
                warn!(event = "envelope_decode_error", link = %link, error = %error);
            }
            TransportEvent::Reconnecting { after, .. } => {
                info!(event = "transport_reconnect", link = %link, after_ms = after.as_millis() as u64);
            }
            TransportEvent::Dropped { reason, .. } => {
                warn!(event = "transport_dropped", link = %link, reason = %reason);
                self.subscriptions.release(link);
                self.subscription = None;
                let effects = self.store.apply_transport_error(reason);
                self.execute(effects);
            }
        }
    }

    pub fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::StopResolved {
                strategy_id,
                generation,
                result,
            } => {
                if !self.is_current(strategy_id, generation) {
                    debug!(event = "stop_result_stale", strategy_id = %strategy_id, generation);
                    return;
                }
                let effects = match result {
                    Ok(()) => self.store.acknowledge_stop(),
                    Err(err) => {
                        warn!(event = "stop_failed", strategy_id = %strategy_id, error = %err);
                        self.store.reject_stop(err.to_string())
                    }
                };
                self.execute(effects);
            }
            Inbound::WindowOpened {
                strategy_id,
                generation,
                result,
            } => match result {
                Ok(()) => debug!(event = "companion_window_ready", strategy_id = %strategy_id, generation),
                Err(err) => {
                    warn!(event = "companion_window_failed", strategy_id = %strategy_id, error = %err);
                    self.notify_outcome(Notice::error(
                        Some(strategy_id),
                        format!("could not open the execution window: {err}"),
                    ));
                }
            },
        }
    }

    /// Runs every deferred action due at `now` that still belongs to the
    /// current generation.
    pub fn fire_due(&mut self, now: Instant) {
        let generation = self.store.current_generation();
        for action in self.scheduler.take_due(now, generation) {
            match action {
                DeferredAction::DismissDialog { open_window_after } => {
                    self.store.set_dialog_visible(false);
                    info!(event = "dialog_dismissed", generation);
                    if let Some(delay) = open_window_after {
                        self.scheduler.schedule_at(
                            now + delay,
                            generation,
                            DeferredAction::OpenCompanionWindow,
                        );
                    }
                }
                DeferredAction::OpenCompanionWindow => self.open_companion_window(generation),
            }
        }
    }

    fn open_companion_window(&mut self, generation: u64) {
        let Some(strategy_id) = self.store.strategy_id() else {
            return;
        };
        info!(event = "companion_window_requested", strategy_id = %strategy_id, generation);
        let window = Arc::clone(&self.window);
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = window.open(strategy_id).await;
            let _ = inbox
                .send(Inbound::WindowOpened {
                    strategy_id,
                    generation,
                    result,
                })
                .await;
        });
    }

    fn spawn_stop(&mut self) {
        let Some(strategy_id) = self.store.strategy_id() else {
            return;
        };
        let generation = self.store.current_generation();
        let control = Arc::clone(&self.control);
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = control.stop(strategy_id).await;
            let _ = inbox
                .send(Inbound::StopResolved {
                    strategy_id,
                    generation,
                    result,
                })
                .await;
        });
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::OpenSubscription => {
                    let Some(strategy_id) = self.store.strategy_id() else {
                        continue;
                    };
                    if let Some(previous) = self.subscription.take() {
                        self.subscriptions.close(&previous);
                    }
                    self.subscription = Some(self.subscriptions.open(strategy_id));
                }
                Effect::CloseSubscription => {
                    if let Some(handle) = self.subscription.take() {
                        self.subscriptions.close(&handle);
                    }
                }
                Effect::Schedule { delay, action } => {
                    self.scheduler
                        .schedule(self.store.current_generation(), delay, action);
                }
                Effect::CancelScheduled => {
                    let cancelled = self.scheduler.cancel_all();
                    if cancelled > 0 {
                        debug!(event = "deferred_actions_cancelled", cancelled);
                    }
                }
                Effect::Notify(notice) => self.notify(notice),
                Effect::StopRemote => self.spawn_stop(),
                other => debug!(event = "effect_unhandled", effect = ?other),
            }
        }
    }

    /// Outcomes of commands have no envelope behind them. While the dialog
    /// hides notices they are written into the session log instead.
    fn notify_outcome(&mut self, notice: Notice) {
        if self.store.dialog_visible() {
            self.store.record_notice(&notice);
        }
        self.notify(notice);
    }

    fn notify(&self, notice: Notice) {
        if self.store.dialog_visible() {
            debug!(event = "notice_suppressed", level = %notice.level, message = %notice.message);
            return;
        }
        self.notifier.notify(&notice);
    }

    fn is_current(&self, strategy_id: StrategyId, generation: u64) -> bool {
        self.store.strategy_id() == Some(strategy_id)
            && self.store.current_generation() == generation
    }

    fn publish(&self) {
        let view = self.store.view();
        self.views.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

/// Local state adopted for a remote status seen at mount time. `None` keeps
/// the session at rest.
pub fn adopted_state(status: RemoteStatus) -> Option<LifecycleState> {
    match status {
        RemoteStatus::Stopped => None,
        RemoteStatus::Initializing => Some(LifecycleState::Initializing),
        RemoteStatus::Ready => Some(LifecycleState::Ready),
        RemoteStatus::Running | RemoteStatus::Playing | RemoteStatus::Pausing => {
            Some(LifecycleState::Running)
        }
        RemoteStatus::Failed => Some(LifecycleState::Failed),
    }
}

async fn wait_until(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_status_mapping() {
        assert_eq!(adopted_state(RemoteStatus::Stopped), None);
        assert_eq!(
            adopted_state(RemoteStatus::Pausing),
            Some(LifecycleState::Running)
        );
        assert_eq!(
            adopted_state(RemoteStatus::Playing),
            Some(LifecycleState::Running)
        );
        assert_eq!(
            adopted_state(RemoteStatus::Ready),
            Some(LifecycleState::Ready)
        );
        assert_eq!(
            adopted_state(RemoteStatus::Failed),
            Some(LifecycleState::Failed)
        );
    }
}
