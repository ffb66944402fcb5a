//! Global atomic counters for the sandbox service.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. after each sweep or at shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub sessions_rejected: u64,
    pub sessions_failed: u64,
    pub sessions_expired: u64,
    pub sessions_closed: u64,
    pub executions_run: u64,
    pub executions_timed_out: u64,
    pub executions_cancelled: u64,
    pub sandboxes_destroyed: u64,
}

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    sessions_created: AtomicU64,
    sessions_rejected: AtomicU64,
    sessions_failed: AtomicU64,
    sessions_expired: AtomicU64,
    sessions_closed: AtomicU64,
    executions_run: AtomicU64,
    executions_timed_out: AtomicU64,
    executions_cancelled: AtomicU64,
    sandboxes_destroyed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            sessions_created: AtomicU64::new(0),
            sessions_rejected: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            sessions_expired: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            executions_run: AtomicU64::new(0),
            executions_timed_out: AtomicU64::new(0),
            executions_cancelled: AtomicU64::new(0),
            sandboxes_destroyed: AtomicU64::new(0),
        }
    }

    counter!(inc_sessions_created, sessions_created);
    counter!(inc_sessions_rejected, sessions_rejected);
    counter!(inc_sessions_failed, sessions_failed);
    counter!(inc_sessions_expired, sessions_expired);
    counter!(inc_sessions_closed, sessions_closed);
    counter!(inc_executions_run, executions_run);
    counter!(inc_executions_timed_out, executions_timed_out);
    counter!(inc_executions_cancelled, executions_cancelled);
    counter!(inc_sandboxes_destroyed, sandboxes_destroyed);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            executions_run: self.executions_run.load(Ordering::Relaxed),
            executions_timed_out: self.executions_timed_out.load(Ordering::Relaxed),
            executions_cancelled: self.executions_cancelled.load(Ordering::Relaxed),
            sandboxes_destroyed: self.sandboxes_destroyed.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (sweeper tick, shutdown)
    /// rather than on every increment.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            sessions_created = s.sessions_created,
            sessions_rejected = s.sessions_rejected,
            sessions_failed = s.sessions_failed,
            sessions_expired = s.sessions_expired,
            sessions_closed = s.sessions_closed,
            executions_run = s.executions_run,
            executions_timed_out = s.executions_timed_out,
            executions_cancelled = s.executions_cancelled,
            sandboxes_destroyed = s.sandboxes_destroyed,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.sessions_created,
            &self.sessions_rejected,
            &self.sessions_failed,
            &self.sessions_expired,
            &self.sessions_closed,
            &self.executions_run,
            &self.executions_timed_out,
            &self.executions_cancelled,
            &self.sandboxes_destroyed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
