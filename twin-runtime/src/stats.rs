//! Runtime counters
//!
//! Cheap atomic counters shared by the manager, actors and dispatcher.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one runtime node
#[derive(Debug, Default)]
pub struct RuntimeStats {
    /// Messages accepted into a mailbox
    pub messages_enqueued: AtomicU64,
    /// Messages taken out of a mailbox and processed
    pub messages_handled: AtomicU64,
    /// Messages refused by a deleted actor
    pub messages_rejected: AtomicU64,
    /// Messages discarded from the mailbox of a deleted actor
    pub messages_dropped: AtomicU64,
    /// `HandleLoop` tasks submitted to the pool
    pub loops_scheduled: AtomicU64,
    pub flushes: AtomicU64,
    pub flush_failures: AtomicU64,
    pub mapper_execs: AtomicU64,
    pub mapper_failures: AtomicU64,
    /// Events delivered by a pub/sub consumer
    pub events_received: AtomicU64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_enqueued: self.messages_enqueued.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            loops_scheduled: self.loops_scheduled.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            mapper_execs: self.mapper_execs.load(Ordering::Relaxed),
            mapper_failures: self.mapper_failures.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`RuntimeStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub messages_enqueued: u64,
    pub messages_handled: u64,
    pub messages_rejected: u64,
    pub messages_dropped: u64,
    pub loops_scheduled: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub mapper_execs: u64,
    pub mapper_failures: u64,
    pub events_received: u64,
}

impl StatsSnapshot {
    /// Every accepted message has been processed or discarded
    pub fn is_drained(&self) -> bool {
        self.messages_enqueued == self.messages_handled + self.messages_dropped
    }
}
