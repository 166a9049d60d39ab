pub mod envelope;
pub mod frame;
pub mod status;

pub use envelope::{
    DedupKey, EnvelopeKind, LogEnvelope, NodeRecord, NodeRunState, Severity, StrategyId,
    StrategyRecord, StrategyRunState,
};
pub use frame::{
    decode_frame, encode_frame, DecodeReport, FrameError, NdjsonFrameDecoder,
    DEFAULT_MAX_FRAME_BYTES,
};
pub use status::{RemoteStatus, StatusResponse};
