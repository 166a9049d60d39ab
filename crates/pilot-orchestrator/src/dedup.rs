use pilot_core::{DedupKey, LogEnvelope};
use std::collections::HashSet;

/// Transition keys already acted upon in the current generation.
///
/// Entries live for the whole session; the ledger is only cleared when a
/// new generation starts.
#[derive(Debug, Default, Clone)]
pub struct DedupLedger {
    seen: HashSet<DedupKey>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time an envelope's key is seen.
    pub fn accept(&mut self, envelope: &LogEnvelope) -> bool {
        self.seen.insert(envelope.dedup_key())
    }

    pub fn contains(&self, envelope: &LogEnvelope) -> bool {
        self.seen.contains(&envelope.dedup_key())
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
