//! Receiver counters, updated by the dispatch loop and readable from any
//! thread.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    connections_lost: AtomicU64,
    accept_failures: AtomicU64,
    messages_dispatched: AtomicU64,
    buffer_growths: AtomicU64,
    callback_panics: AtomicU64,
    live_instances: AtomicUsize,
}

/// Shared handle to a receiver's counters.
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    counters: Arc<Counters>,
}

/// Point-in-time copy of [`ReceiverStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub connections_lost: u64,
    /// Failed accepts, resource exhaustion included. The listener stays
    /// armed after each.
    pub accept_failures: u64,
    pub messages_dispatched: u64,
    pub buffer_growths: u64,
    pub callback_panics: u64,
    /// Instances currently in the pool, including the listening one.
    pub live_instances: usize,
}

impl StatsSnapshot {
    /// Peers currently connected.
    pub fn connected_peers(&self) -> usize {
        self.live_instances.saturating_sub(1)
    }
}

impl ReceiverStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            connections_accepted: c.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: c.connections_rejected.load(Ordering::Relaxed),
            connections_lost: c.connections_lost.load(Ordering::Relaxed),
            accept_failures: c.accept_failures.load(Ordering::Relaxed),
            messages_dispatched: c.messages_dispatched.load(Ordering::Relaxed),
            buffer_growths: c.buffer_growths.load(Ordering::Relaxed),
            callback_panics: c.callback_panics.load(Ordering::Relaxed),
            live_instances: c.live_instances.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_accepted(&self) {
        self.counters
            .connections_accepted
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.counters
            .connections_rejected
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lost(&self) {
        self.counters.connections_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accept_failure(&self) {
        self.counters.accept_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.counters
            .messages_dispatched
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_growth(&self) {
        self.counters.buffer_growths.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panic(&self) {
        self.counters.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_live_instances(&self, count: usize) {
        self.counters.live_instances.store(count, Ordering::Relaxed);
    }
}
