pub mod config;
pub mod control;
pub mod dedup;
pub mod error;
pub mod lifecycle;
pub mod log_buffer;
pub mod notice;
pub mod orchestrator;
pub mod scheduler;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod window;

pub use config::PilotConfig;
pub use control::{classify_init, ControlApi, HttpControl, InitOutcome};
pub use dedup::DedupLedger;
pub use error::{ConfigError, ControlError, OrchestratorClosed, TransportError, WindowError};
pub use lifecycle::{
    transition, DeferredAction, Effect, LifecycleEvent, LifecycleState, Timings, Transition,
};
pub use log_buffer::{LogBuffer, DEFAULT_LOG_CAPACITY};
pub use notice::{FailureReport, Notice, NoticeLevel, Notifier};
pub use orchestrator::{
    adopted_state, Collaborators, Command, Inbound, Orchestrator, OrchestratorHandle,
    OrchestratorSettings,
};
pub use scheduler::EffectScheduler;
pub use session::{SessionStore, SessionView};
pub use subscription::{
    LinkId, PumpSettings, SubscriptionHandle, SubscriptionManager, TransportEvent,
};
pub use transport::{ChunkStream, EventTransport, HttpEventTransport};
pub use window::{companion_window_for, BrowserTabWindow, CompanionWindow, DesktopHostWindow};
