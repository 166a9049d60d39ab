use pilot_core::LogEnvelope;
use std::collections::VecDeque;

pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Bounded, newest-first record of received envelopes.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    capacity: usize,
    entries: VecDeque<LogEnvelope>,
    pushed: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            pushed: 0,
        }
    }

    pub fn push(&mut self, envelope: LogEnvelope) {
        self.entries.push_front(envelope);
        self.pushed += 1;
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Entries pushed over the buffer's lifetime. Survives `clear` and
    /// overflow, so readers can count what is new since their last look
    /// even when contents repeat.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn newest(&self) -> Option<&LogEnvelope> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEnvelope> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<LogEnvelope> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
