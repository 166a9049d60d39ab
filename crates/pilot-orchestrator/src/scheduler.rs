use crate::lifecycle::DeferredAction;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub generation: u64,
    pub action: DeferredAction,
}

/// Deadline-ordered deferred actions, each tagged with the generation it was
/// scheduled under. A task whose generation no longer matches is discarded
/// when it comes due.
#[derive(Debug, Default)]
pub struct EffectScheduler {
    queue: BTreeMap<(Instant, u64), ScheduledTask>,
    seq: u64,
}

impl EffectScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, generation: u64, delay: Duration, action: DeferredAction) -> Instant {
        let due = Instant::now() + delay;
        self.schedule_at(due, generation, action);
        due
    }

    pub fn schedule_at(&mut self, due: Instant, generation: u64, action: DeferredAction) {
        self.seq = self.seq.wrapping_add(1);
        self.queue
            .insert((due, self.seq), ScheduledTask { generation, action });
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(due, _)| *due)
    }

    /// Removes every task due at or before `now` and returns the actions that
    /// still belong to `current_generation`, in deadline order.
    pub fn take_due(&mut self, now: Instant, current_generation: u64) -> Vec<DeferredAction> {
        let mut ready = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let task = entry.remove();
            if task.generation != current_generation {
                debug!(
                    event = "deferred_action_stale",
                    scheduled_generation = task.generation,
                    generation = current_generation,
                    action = ?task.action
                );
                continue;
            }
            ready.push(task.action);
        }
        ready
    }

    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
