//! Global atomic counters for curation observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a session).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    actions_applied: AtomicU64,
    actions_rejected: AtomicU64,
    sessions_committed: AtomicU64,
    sessions_rolled_back: AtomicU64,
    breaker_trips: AtomicU64,
    rollback_failures: AtomicU64,
    memories_extracted: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub actions_applied: u64,
    pub actions_rejected: u64,
    pub sessions_committed: u64,
    pub sessions_rolled_back: u64,
    pub breaker_trips: u64,
    pub rollback_failures: u64,
    pub memories_extracted: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            actions_applied: AtomicU64::new(0),
            actions_rejected: AtomicU64::new(0),
            sessions_committed: AtomicU64::new(0),
            sessions_rolled_back: AtomicU64::new(0),
            breaker_trips: AtomicU64::new(0),
            rollback_failures: AtomicU64::new(0),
            memories_extracted: AtomicU64::new(0),
        }
    }

    pub fn inc_actions_applied(&self) {
        self.actions_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "actions_applied", "counter incremented");
    }

    pub fn inc_actions_rejected(&self) {
        self.actions_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "actions_rejected", "counter incremented");
    }

    pub fn inc_sessions_committed(&self) {
        self.sessions_committed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_committed", "counter incremented");
    }

    pub fn inc_sessions_rolled_back(&self) {
        self.sessions_rolled_back.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_rolled_back", "counter incremented");
    }

    pub fn inc_breaker_trips(&self) {
        self.breaker_trips.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "breaker_trips", "counter incremented");
    }

    pub fn inc_rollback_failures(&self) {
        self.rollback_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rollback_failures", "counter incremented");
    }

    pub fn add_memories_extracted(&self, n: u64) {
        self.memories_extracted.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "memories_extracted", n, "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            actions_applied: self.actions_applied.load(Ordering::Relaxed),
            actions_rejected: self.actions_rejected.load(Ordering::Relaxed),
            sessions_committed: self.sessions_committed.load(Ordering::Relaxed),
            sessions_rolled_back: self.sessions_rolled_back.load(Ordering::Relaxed),
            breaker_trips: self.breaker_trips.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
            memories_extracted: self.memories_extracted.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            actions_applied = s.actions_applied,
            actions_rejected = s.actions_rejected,
            sessions_committed = s.sessions_committed,
            sessions_rolled_back = s.sessions_rolled_back,
            breaker_trips = s.breaker_trips,
            rollback_failures = s.rollback_failures,
            memories_extracted = s.memories_extracted,
        );
    }

    /// Reset all counters to zero (test isolation).
    pub fn reset(&self) {
        self.actions_applied.store(0, Ordering::Relaxed);
        self.actions_rejected.store(0, Ordering::Relaxed);
        self.sessions_committed.store(0, Ordering::Relaxed);
        self.sessions_rolled_back.store(0, Ordering::Relaxed);
        self.breaker_trips.store(0, Ordering::Relaxed);
        self.rollback_failures.store(0, Ordering::Relaxed);
        self.memories_extracted.store(0, Ordering::Relaxed);
    }
}
