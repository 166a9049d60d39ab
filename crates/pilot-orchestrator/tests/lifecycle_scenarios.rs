use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use pilot_core::{
    encode_frame, LogEnvelope, NodeRecord, NodeRunState, RemoteStatus, Severity, StrategyId,
    StrategyRecord, StrategyRunState, DEFAULT_MAX_FRAME_BYTES,
};
use pilot_orchestrator::{
    ChunkStream, Collaborators, CompanionWindow, ControlApi, ControlError, EventTransport,
    LifecycleState, Notice, NoticeLevel, Notifier, Orchestrator, OrchestratorHandle,
    OrchestratorSettings, SessionView, TransportError, WindowError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Chunk = Result<Vec<u8>, TransportError>;

#[derive(Default)]
struct FakeControl {
    init_results: Mutex<VecDeque<Result<(), ControlError>>>,
    stop_error: Mutex<Option<ControlError>>,
    status: Mutex<Option<RemoteStatus>>,
    init_calls: AtomicUsize,
    run_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl FakeControl {
    fn queue_init(&self, result: Result<(), ControlError>) {
        self.init_results.lock().expect("lock").push_back(result);
    }
}

#[async_trait]
impl ControlApi for FakeControl {
    async fn initialize(&self, _strategy_id: StrategyId) -> Result<(), ControlError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.init_results
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn run(&self, _strategy_id: StrategyId) -> Result<(), ControlError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _strategy_id: StrategyId) -> Result<(), ControlError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        match self.stop_error.lock().expect("lock").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn query_status(&self, _strategy_id: StrategyId) -> Result<RemoteStatus, ControlError> {
        self.status
            .lock()
            .expect("lock")
            .ok_or_else(|| ControlError::Request("status unavailable".to_string()))
    }
}

/// Each connect consumes the next queued feed; with none queued the stream
/// stays silent.
#[derive(Default)]
struct ChannelTransport {
    feeds: Mutex<VecDeque<mpsc::UnboundedReceiver<Chunk>>>,
    connects: AtomicUsize,
}

impl ChannelTransport {
    fn feed(&self) -> mpsc::UnboundedSender<Chunk> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().expect("lock").push_back(rx);
        tx
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventTransport for ChannelTransport {
    async fn connect(&self, _strategy_id: StrategyId) -> Result<ChunkStream, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.feeds.lock().expect("lock").pop_front();
        match next {
            Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (chunk, rx))
            })
            .boxed()),
            None => Ok(stream::pending::<Chunk>().boxed()),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    fn notices(&self) -> Vec<Notice> {
        self.notices.lock().expect("lock").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices.lock().expect("lock").push(notice.clone());
    }
}

#[derive(Default)]
struct CountingWindow {
    opened: AtomicUsize,
    fail: bool,
}

impl CountingWindow {
    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompanionWindow for CountingWindow {
    async fn open(&self, _strategy_id: StrategyId) -> Result<(), WindowError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(WindowError::Launch("no display".to_string()));
        }
        Ok(())
    }
}

struct Harness {
    handle: OrchestratorHandle,
    control: Arc<FakeControl>,
    transport: Arc<ChannelTransport>,
    notifier: Arc<RecordingNotifier>,
    window: Arc<CountingWindow>,
    task: JoinHandle<()>,
}

impl Harness {
    fn new() -> Self {
        Self::with_window(CountingWindow::default())
    }

    fn with_window(window: CountingWindow) -> Self {
        let control = Arc::new(FakeControl::default());
        let transport = Arc::new(ChannelTransport::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let window = Arc::new(window);
        let (orchestrator, handle) = Orchestrator::new(
            OrchestratorSettings::default(),
            Collaborators {
                control: control.clone(),
                transport: transport.clone(),
                notifier: notifier.clone(),
                window: window.clone(),
            },
        );
        let task = tokio::spawn(orchestrator.run());
        Self {
            handle,
            control,
            transport,
            notifier,
            window,
            task,
        }
    }

    async fn wait_for(&self, mut predicate: impl FnMut(&SessionView) -> bool) -> SessionView {
        let mut rx = self.handle.subscribe();
        let view = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|view| predicate(view)))
            .await
            .expect("timed out waiting for session view")
            .expect("orchestrator stopped");
        view.clone()
    }

    async fn shutdown(self) {
        self.handle.shutdown().await.expect("shutdown");
        self.task.await.expect("orchestrator task");
    }
}

fn id() -> StrategyId {
    StrategyId::new(7).expect("id")
}

fn strategy(state: StrategyRunState, timestamp: i64) -> LogEnvelope {
    LogEnvelope::Strategy(StrategyRecord {
        strategy_id: id(),
        strategy_state: state,
        severity: if state == StrategyRunState::Failed {
            Severity::Error
        } else {
            Severity::Info
        },
        timestamp,
        datetime: String::new(),
        message: format!("{} reached", state.as_str()),
        strategy_name: "mean-revert".to_string(),
        error_code: (state == StrategyRunState::Failed).then(|| "E100".to_string()),
        error_code_chain: None,
    })
}

fn node_error(code: &str, timestamp: i64) -> LogEnvelope {
    LogEnvelope::Node(NodeRecord {
        strategy_id: id(),
        node_id: "n-3".to_string(),
        node_name: "kline".to_string(),
        node_type: "KlineNode".to_string(),
        node_state: NodeRunState::Failed,
        severity: Severity::Error,
        timestamp,
        datetime: String::new(),
        message: "symbol not found".to_string(),
        error_code: Some(code.to_string()),
    })
}

fn frame(envelope: &LogEnvelope) -> Chunk {
    Ok(encode_frame(envelope, DEFAULT_MAX_FRAME_BYTES).expect("encode"))
}

async fn start_running(harness: &Harness, feed: &mpsc::UnboundedSender<Chunk>) {
    harness.handle.start(id()).await.expect("start");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Initializing)
        .await;
    feed.send(frame(&strategy(StrategyRunState::Checking, 100)))
        .expect("feed");
    feed.send(frame(&strategy(StrategyRunState::Initializing, 200)))
        .expect("feed");
    feed.send(frame(&strategy(StrategyRunState::Ready, 1000)))
        .expect("feed");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Running)
        .await;
}

#[tokio::test(start_paused = true)]
async fn happy_path_dismisses_dialog_then_opens_window_once() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    start_running(&harness, &feed).await;

    let view = harness.handle.view();
    assert!(view.dialog_visible);
    assert!(view.is_running);
    assert!(view.is_backtesting);
    assert_eq!(view.log.len(), 3);
    assert_eq!(view.log[0].timestamp(), 1000);

    tokio::time::sleep(Duration::from_millis(1_999)).await;
    assert!(harness.handle.view().dialog_visible);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(!harness.handle.view().dialog_visible);
    assert_eq!(harness.window.opened(), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.window.opened(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.window.opened(), 1);
    assert_eq!(harness.handle.view().lifecycle, LifecycleState::Running);
    assert_eq!(harness.transport.connects(), 1);
    // Success notice fell while the dialog was still up.
    assert!(harness.notifier.notices().is_empty());
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_ready_opens_window_exactly_once() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    harness.handle.start(id()).await.expect("start");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Initializing)
        .await;

    feed.send(frame(&strategy(StrategyRunState::Ready, 1000)))
        .expect("feed");
    feed.send(frame(&strategy(StrategyRunState::Ready, 1000)))
        .expect("feed");
    let view = harness.wait_for(|view| view.log.len() == 2).await;
    assert_eq!(view.lifecycle, LifecycleState::Running);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.window.opened(), 1);
    assert_eq!(harness.handle.view().lifecycle, LifecycleState::Running);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn node_failure_during_initialization_fails_without_window() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    harness.handle.start(id()).await.expect("start");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Initializing)
        .await;

    feed.send(frame(&strategy(StrategyRunState::Checking, 100)))
        .expect("feed");
    feed.send(frame(&node_error("E42", 150))).expect("feed");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Failed)
        .await;

    assert!(view.is_failed);
    assert!(!view.is_initializing);
    assert!(!view.is_backtesting);
    assert!(!view.subscription_active);
    let failure = view.failure.expect("failure report");
    assert_eq!(failure.error_code.as_deref(), Some("E42"));
    assert_eq!(failure.node.as_deref(), Some("kline (n-3)"));

    // Late Ready on a closed subscription changes nothing.
    let _ = feed.send(frame(&strategy(StrategyRunState::Ready, 1000)));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.window.opened(), 0);
    assert_eq!(harness.handle.view().lifecycle, LifecycleState::Failed);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_notice_reaches_user_once_dialog_is_hidden() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    harness.handle.start(id()).await.expect("start");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Initializing)
        .await;
    harness
        .handle
        .set_dialog_visible(false)
        .await
        .expect("hide dialog");
    let view = harness.wait_for(|view| !view.dialog_visible).await;
    assert_eq!(view.lifecycle, LifecycleState::Initializing);

    feed.send(frame(&strategy(StrategyRunState::Failed, 300)))
        .expect("feed");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Failed)
        .await;

    let notices = harness.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    let report = notices[0].failure.as_ref().expect("report");
    assert!(report.copy_text().contains("error code: E100"));
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn conflict_on_init_is_a_notice_not_a_failure() {
    let harness = Harness::new();
    harness
        .control
        .queue_init(Err(ControlError::Conflict(id())));
    harness.handle.start(id()).await.expect("start");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let view = harness.handle.view();
    assert_eq!(view.lifecycle, LifecycleState::Idle);
    assert!(view.failure.is_none());
    assert!(!view.subscription_active);
    assert_eq!(harness.transport.connects(), 0);

    let notices = harness.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Info);
    assert!(notices[0].message.contains("already running"));
    harness.shutdown().await;
}

async fn fail_with_dialog_open(harness: &Harness, feed: &mpsc::UnboundedSender<Chunk>) -> SessionView {
    harness.handle.start(id()).await.expect("start");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Initializing)
        .await;
    feed.send(frame(&node_error("E42", 150))).expect("feed");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Failed)
        .await;
    assert!(view.dialog_visible);
    view
}

#[tokio::test(start_paused = true)]
async fn conflict_after_failure_is_shown_in_open_dialog() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    let failed = fail_with_dialog_open(&harness, &feed).await;

    harness
        .control
        .queue_init(Err(ControlError::Conflict(id())));
    harness.handle.start(id()).await.expect("start");
    let view = harness
        .wait_for(|view| view.log_pushed > failed.log_pushed)
        .await;

    assert_eq!(view.lifecycle, LifecycleState::Failed);
    let newest = view.log.first().expect("note");
    assert!(newest.message().contains("already running"));
    assert_eq!(newest.severity(), Severity::Info);
    assert!(harness.notifier.notices().is_empty());
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_retry_replaces_report_in_open_dialog() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    fail_with_dialog_open(&harness, &feed).await;

    harness.control.queue_init(Err(ControlError::Status {
        status: 503,
        body: "maintenance".to_string(),
    }));
    harness.handle.retry().await.expect("retry");
    let view = harness
        .wait_for(|view| {
            view.failure.as_ref().and_then(|report| report.error_code.as_deref())
                == Some("HTTP_503")
        })
        .await;

    assert_eq!(view.lifecycle, LifecycleState::Failed);
    let newest = view.log.first().expect("note");
    assert_eq!(newest.severity(), Severity::Error);
    assert!(newest.message().contains("error code: HTTP_503"));
    assert!(harness.notifier.notices().is_empty());
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn other_init_errors_fail_the_session() {
    let harness = Harness::new();
    harness.control.queue_init(Err(ControlError::Status {
        status: 503,
        body: "maintenance".to_string(),
    }));
    harness.handle.start(id()).await.expect("start");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Failed)
        .await;
    assert_eq!(
        view.failure.and_then(|report| report.error_code),
        Some("HTTP_503".to_string())
    );
    assert_eq!(harness.transport.connects(), 0);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn restart_within_delay_never_fires_previous_window() {
    let harness = Harness::new();
    let first = harness.transport.feed();
    start_running(&harness, &first).await;
    let first_generation = harness.handle.view().generation;

    harness.handle.stop().await.expect("stop");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Stopped)
        .await;
    assert_eq!(harness.control.stop_calls.load(Ordering::SeqCst), 1);

    let _second = harness.transport.feed();
    harness.handle.start(id()).await.expect("restart");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Initializing)
        .await;
    assert_eq!(view.generation, first_generation + 1);
    assert!(view.log.is_empty());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.window.opened(), 0);
    assert!(harness.handle.view().dialog_visible);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn log_buffer_keeps_newest_hundred() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    harness.handle.start(id()).await.expect("start");
    for ts in 0..150 {
        feed.send(frame(&strategy(StrategyRunState::Checking, ts)))
            .expect("feed");
    }
    let view = harness
        .wait_for(|view| view.log.first().map(LogEnvelope::timestamp) == Some(149))
        .await;
    assert_eq!(view.log.len(), 100);
    assert_eq!(view.log.last().map(LogEnvelope::timestamp), Some(50));
    assert_eq!(view.lifecycle, LifecycleState::Initializing);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_silently() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    harness.handle.start(id()).await.expect("start");
    feed.send(Ok(b"{\"kind\":\"strategy\",\"strategyId\":\n".to_vec()))
        .expect("feed");
    feed.send(Ok(b"not json at all\n".to_vec())).expect("feed");
    feed.send(frame(&strategy(StrategyRunState::Ready, 1000)))
        .expect("feed");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Running)
        .await;
    assert_eq!(view.log.len(), 1);
    assert!(view.failure.is_none());
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transport_drop_fails_then_retry_reconnects() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    harness.handle.start(id()).await.expect("start");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Initializing)
        .await;

    feed.send(Err(TransportError::Stream("connection reset".to_string())))
        .expect("feed");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Failed)
        .await;
    assert_eq!(
        view.failure.as_ref().and_then(|report| report.error_code.as_deref()),
        Some("TRANSPORT_ERROR")
    );
    assert!(!view.subscription_active);

    let retry_feed = harness.transport.feed();
    harness.handle.retry().await.expect("retry");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Initializing)
        .await;
    assert!(view.failure.is_none());
    assert_eq!(view.generation, 2);

    retry_feed
        .send(frame(&strategy(StrategyRunState::Ready, 1000)))
        .expect("feed");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Running)
        .await;
    assert_eq!(harness.transport.connects(), 2);
    assert_eq!(harness.control.init_calls.load(Ordering::SeqCst), 2);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn graceful_close_reconnects_without_failing() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    harness.handle.start(id()).await.expect("start");
    feed.send(frame(&strategy(StrategyRunState::Checking, 100)))
        .expect("feed");
    harness.wait_for(|view| view.log.len() == 1).await;

    let resumed = harness.transport.feed();
    drop(feed);
    resumed
        .send(frame(&strategy(StrategyRunState::Ready, 1000)))
        .expect("feed");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Running)
        .await;
    assert!(view.subscription_active);
    assert_eq!(harness.transport.connects(), 2);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_failure_moves_to_failed() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    start_running(&harness, &feed).await;
    *harness.control.stop_error.lock().expect("lock") = Some(ControlError::Request(
        "gateway timeout".to_string(),
    ));

    harness.handle.stop().await.expect("stop");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Failed)
        .await;
    assert_eq!(
        view.failure.and_then(|report| report.error_code),
        Some("STOP_FAILED".to_string())
    );
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stopped_record_while_stopping_closes_session() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    start_running(&harness, &feed).await;

    harness.handle.stop().await.expect("stop");
    feed.send(frame(&strategy(StrategyRunState::Stopped, 5000)))
        .expect("feed");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Stopped)
        .await;
    assert!(!view.is_backtesting);
    assert!(!view.subscription_active);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.window.opened(), 0);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn window_failure_is_reported_without_changing_state() {
    let harness = Harness::with_window(CountingWindow {
        fail: true,
        ..CountingWindow::default()
    });
    let feed = harness.transport.feed();
    start_running(&harness, &feed).await;

    tokio::time::sleep(Duration::from_millis(2_400)).await;
    assert_eq!(harness.window.opened(), 1);
    assert_eq!(harness.handle.view().lifecycle, LifecycleState::Running);
    let notices = harness.notifier.notices();
    assert!(notices
        .iter()
        .any(|notice| notice.level == NoticeLevel::Error
            && notice.message.contains("execution window")));
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconcile_adopts_remote_run_with_hidden_dialog() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    *harness.control.status.lock().expect("lock") = Some(RemoteStatus::Playing);

    harness.handle.reconcile(id()).await.expect("reconcile");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Running)
        .await;
    assert!(!view.dialog_visible);
    assert!(view.subscription_active);
    assert_eq!(harness.control.init_calls.load(Ordering::SeqCst), 0);

    feed.send(frame(&strategy(StrategyRunState::Failed, 9000)))
        .expect("feed");
    harness
        .wait_for(|view| view.lifecycle == LifecycleState::Failed)
        .await;
    assert_eq!(harness.notifier.notices().len(), 1);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconcile_with_stopped_remote_stays_idle() {
    let harness = Harness::new();
    *harness.control.status.lock().expect("lock") = Some(RemoteStatus::Stopped);
    harness.handle.reconcile(id()).await.expect("reconcile");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.handle.view().lifecycle, LifecycleState::Idle);
    assert_eq!(harness.transport.connects(), 0);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn end_session_is_idempotent_and_resets_to_idle() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    start_running(&harness, &feed).await;

    harness.handle.end_session().await.expect("end");
    harness.handle.end_session().await.expect("end again");
    let view = harness
        .wait_for(|view| view.lifecycle == LifecycleState::Idle)
        .await;
    assert!(view.strategy_id.is_none());
    assert!(view.log.is_empty());
    assert!(!view.subscription_active);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.window.opened(), 0);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn run_is_forwarded_only_when_operational() {
    let harness = Harness::new();
    let feed = harness.transport.feed();
    harness.handle.run().await.expect("run");
    start_running(&harness, &feed).await;
    harness.handle.run().await.expect("run");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.control.run_calls.load(Ordering::SeqCst), 1);
    harness.shutdown().await;
}
