use pilot_core::LogEnvelope;
use pilot_orchestrator::{LifecycleState, Notice, NoticeLevel, Notifier, SessionView};
use tokio::sync::{mpsc, watch};
use tracing::warn;

const NOTICE_CAPACITY: usize = 64;

/// Notifier handing notices to the notification layer task.
pub struct ConsoleNotifier {
    tx: mpsc::Sender<Notice>,
}

pub fn notice_channel() -> (ConsoleNotifier, mpsc::Receiver<Notice>) {
    let (tx, rx) = mpsc::channel(NOTICE_CAPACITY);
    (ConsoleNotifier { tx }, rx)
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: &Notice) {
        if let Err(err) = self.tx.try_send(notice.clone()) {
            warn!(event = "notice_dropped", error = %err);
        }
    }
}

pub fn render_notice(notice: &Notice, at: &str) -> String {
    let tag = match notice.level {
        NoticeLevel::Success => "ok",
        NoticeLevel::Info => "info",
        NoticeLevel::Error => "error",
    };
    let mut text = format!("{at} [{tag}] {}", notice.message.replace('\n', "\n    "));
    if notice.failure.is_some() {
        text.push_str("\n    (type `copy` to print the report again)");
    }
    text
}

/// Global notification layer: prints every notice the orchestrator let
/// through, remembering the last failure report for `copy`.
pub async fn notification_layer(
    mut notices: mpsc::Receiver<Notice>,
    last_failure: watch::Sender<Option<String>>,
) {
    while let Some(notice) = notices.recv().await {
        let at = chrono::Local::now().format("%H:%M:%S").to_string();
        println!("{}", render_notice(&notice, &at));
        if let Some(report) = notice.failure.as_ref() {
            last_failure.send_replace(Some(report.copy_text()));
        }
    }
}

/// Page-local dialog: prints lifecycle changes and, while visible, the new
/// log lines of the shared session.
#[derive(Debug, Default)]
pub struct DialogRenderer {
    lifecycle: Option<LifecycleState>,
    visible: bool,
    seen: u64,
}

impl DialogRenderer {
    pub fn render(&mut self, view: &SessionView) -> Vec<String> {
        let mut lines = Vec::new();

        if view.dialog_visible && !self.visible {
            if let Some(id) = view.strategy_id {
                lines.push(format!("--- strategy {id} ---"));
            }
        } else if !view.dialog_visible && self.visible && !view.lifecycle.is_at_rest() {
            lines.push("--- dialog hidden, session keeps running ---".to_string());
        }
        self.visible = view.dialog_visible;

        if self.lifecycle != Some(view.lifecycle) {
            self.lifecycle = Some(view.lifecycle);
            lines.push(format!("state: {}", view.lifecycle));
            if let Some(report) = view.failure.as_ref().filter(|_| view.is_failed) {
                if view.dialog_visible {
                    lines.push(report.copy_text());
                }
            }
        }

        let fresh = usize::try_from(view.log_pushed.saturating_sub(self.seen))
            .unwrap_or(usize::MAX)
            .min(view.log.len());
        if view.dialog_visible {
            lines.extend(view.log[..fresh].iter().rev().map(LogEnvelope::summary));
        }
        self.seen = view.log_pushed;
        lines
    }
}

pub async fn dialog_surface(mut views: watch::Receiver<SessionView>) {
    let mut renderer = DialogRenderer::default();
    loop {
        let lines = {
            let view = views.borrow_and_update();
            renderer.render(&view)
        };
        for line in lines {
            println!("{line}");
        }
        if views.changed().await.is_err() {
            break;
        }
    }
}

pub fn render_status(view: &SessionView) -> String {
    let id = view
        .strategy_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut text = format!(
        "strategy={id} state={} generation={} dialog={} subscription={} log_entries={}",
        view.lifecycle,
        view.generation,
        if view.dialog_visible { "shown" } else { "hidden" },
        if view.subscription_active { "open" } else { "closed" },
        view.log.len()
    );
    if let Some(name) = view.strategy_name.as_deref() {
        text.push_str(&format!(" name={name}"));
    }
    text
}
