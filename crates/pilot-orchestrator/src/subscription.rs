use crate::transport::EventTransport;
use futures_util::StreamExt;
use pilot_core::{FrameError, LogEnvelope, NdjsonFrameDecoder, StrategyId, DEFAULT_MAX_FRAME_BYTES};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Identifies one physical transport connection. Events carry the link they
/// arrived on so receivers can drop traffic from links already torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub strategy_id: StrategyId,
    pub link: LinkId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Envelope {
        link: LinkId,
        envelope: LogEnvelope,
    },
    Malformed {
        link: LinkId,
        error: FrameError,
    },
    /// The connection failed without a graceful close. The pump has exited.
    Dropped {
        link: LinkId,
        reason: String,
    },
    Reconnecting {
        link: LinkId,
        after: Duration,
    },
}

impl TransportEvent {
    pub fn link(&self) -> LinkId {
        match self {
            TransportEvent::Envelope { link, .. }
            | TransportEvent::Malformed { link, .. }
            | TransportEvent::Dropped { link, .. }
            | TransportEvent::Reconnecting { link, .. } => *link,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpSettings {
    pub max_frame_bytes: usize,
    pub reconnect_max: Duration,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            reconnect_max: Duration::from_secs(10),
        }
    }
}

struct Link {
    id: LinkId,
    subscribers: usize,
    task: JoinHandle<()>,
}

/// At most one live transport per strategy, reference-counted by subscriber.
pub struct SubscriptionManager {
    transport: Arc<dyn EventTransport>,
    events: mpsc::Sender<TransportEvent>,
    settings: PumpSettings,
    links: HashMap<StrategyId, Link>,
    next_link: u64,
}

impl SubscriptionManager {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        events: mpsc::Sender<TransportEvent>,
        settings: PumpSettings,
    ) -> Self {
        Self {
            transport,
            events,
            settings,
            links: HashMap::new(),
            next_link: 0,
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn open(&mut self, strategy_id: StrategyId) -> SubscriptionHandle {
        if let Some(link) = self.links.get_mut(&strategy_id) {
            link.subscribers += 1;
            return SubscriptionHandle {
                strategy_id,
                link: link.id,
            };
        }

        self.next_link += 1;
        let id = LinkId(self.next_link);
        let task = tokio::spawn(pump(
            id,
            strategy_id,
            Arc::clone(&self.transport),
            self.events.clone(),
            self.settings,
        ));
        info!(event = "subscription_opened", strategy_id = %strategy_id, link = %id);
        self.links.insert(
            strategy_id,
            Link {
                id,
                subscribers: 1,
                task,
            },
        );
        SubscriptionHandle {
            strategy_id,
            link: id,
        }
    }

    /// Returns `true` when this call tore the transport down.
    pub fn close(&mut self, handle: &SubscriptionHandle) -> bool {
        let Some(link) = self.links.get_mut(&handle.strategy_id) else {
            return false;
        };
        if link.id != handle.link {
            return false;
        }
        link.subscribers = link.subscribers.saturating_sub(1);
        if link.subscribers > 0 {
            return false;
        }
        if let Some(link) = self.links.remove(&handle.strategy_id) {
            link.task.abort();
            info!(
                event = "subscription_closed",
                strategy_id = %handle.strategy_id,
                link = %link.id
            );
        }
        true
    }

    /// Forgets a link whose pump already exited.
    pub fn release(&mut self, link: LinkId) {
        self.links.retain(|_, entry| entry.id != link);
    }

    /// True while the link is registered, even if its pump has just exited
    /// and its final events are still queued.
    pub fn is_live(&self, link: LinkId) -> bool {
        self.links.values().any(|entry| entry.id == link)
    }

    pub fn subscriber_count(&self, strategy_id: StrategyId) -> usize {
        self.links
            .get(&strategy_id)
            .map(|entry| entry.subscribers)
            .unwrap_or(0)
    }

    pub fn live_links(&self) -> usize {
        self.links.len()
    }

    pub fn close_all(&mut self) {
        for (strategy_id, link) in self.links.drain() {
            link.task.abort();
            info!(event = "subscription_closed", strategy_id = %strategy_id, link = %link.id);
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for link in self.links.values() {
            link.task.abort();
        }
    }
}

pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    let next = current + current;
    if next > max {
        max
    } else {
        next
    }
}

async fn pump(
    link: LinkId,
    strategy_id: StrategyId,
    transport: Arc<dyn EventTransport>,
    events: mpsc::Sender<TransportEvent>,
    settings: PumpSettings,
) {
    let mut backoff = INITIAL_BACKOFF.min(settings.reconnect_max);

    loop {
        let mut stream = match transport.connect(strategy_id).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(event = "transport_connect_error", strategy_id = %strategy_id, link = %link, error = %err);
                let _ = events
                    .send(TransportEvent::Dropped {
                        link,
                        reason: err.to_string(),
                    })
                    .await;
                return;
            }
        };
        info!(event = "transport_connected", strategy_id = %strategy_id, link = %link);

        let mut decoder = NdjsonFrameDecoder::<LogEnvelope>::new(settings.max_frame_bytes);
        let mut delivered = false;
        loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    let report = decoder.push_chunk(&chunk);
                    delivered |= !report.frames.is_empty();
                    if forward(link, report.frames, report.errors, &events).await.is_err() {
                        return;
                    }
                }
                Some(Err(err)) => {
                    warn!(event = "transport_read_error", strategy_id = %strategy_id, link = %link, error = %err);
                    let _ = events
                        .send(TransportEvent::Dropped {
                            link,
                            reason: err.to_string(),
                        })
                        .await;
                    return;
                }
                None => {
                    let report = decoder.finish();
                    if forward(link, report.frames, report.errors, &events).await.is_err() {
                        return;
                    }
                    break;
                }
            }
        }

        if delivered {
            backoff = INITIAL_BACKOFF.min(settings.reconnect_max);
        }
        info!(
            event = "transport_reconnecting",
            strategy_id = %strategy_id,
            link = %link,
            after_ms = backoff.as_millis() as u64
        );
        if events
            .send(TransportEvent::Reconnecting {
                link,
                after: backoff,
            })
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff, settings.reconnect_max);
    }
}

async fn forward(
    link: LinkId,
    frames: Vec<LogEnvelope>,
    errors: Vec<FrameError>,
    events: &mpsc::Sender<TransportEvent>,
) -> Result<(), mpsc::error::SendError<TransportEvent>> {
    for error in errors {
        events.send(TransportEvent::Malformed { link, error }).await?;
    }
    for envelope in frames {
        events.send(TransportEvent::Envelope { link, envelope }).await?;
    }
    Ok(())
}
