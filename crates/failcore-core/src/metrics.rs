//! Per-executor step counters.
//!
//! Counters use relaxed atomics and are incremented silently at the call site.
//! They are observability only: concurrent steps may interleave increments, so
//! nothing should treat them as an exact cross-step ledger. Call
//! [`ExecutorMetrics::flush`] to emit current values as one `info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    steps_started: AtomicU64,
    steps_ok: AtomicU64,
    steps_blocked: AtomicU64,
    steps_failed: AtomicU64,
    recorder_errors: AtomicU64,
}

/// Point-in-time copy of [`ExecutorMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub steps_started: u64,
    pub steps_ok: u64,
    pub steps_blocked: u64,
    pub steps_failed: u64,
    pub recorder_errors: u64,
}

impl ExecutorMetrics {
    pub const fn new() -> Self {
        Self {
            steps_started: AtomicU64::new(0),
            steps_ok: AtomicU64::new(0),
            steps_blocked: AtomicU64::new(0),
            steps_failed: AtomicU64::new(0),
            recorder_errors: AtomicU64::new(0),
        }
    }

    pub fn inc_started(&self) {
        self.steps_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "steps_started", "counter incremented");
    }

    pub fn inc_ok(&self) {
        self.steps_ok.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "steps_ok", "counter incremented");
    }

    pub fn inc_blocked(&self) {
        self.steps_blocked.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "steps_blocked", "counter incremented");
    }

    pub fn inc_failed(&self) {
        self.steps_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "steps_failed", "counter incremented");
    }

    pub fn inc_recorder_errors(&self) {
        self.recorder_errors.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "recorder_errors", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            steps_started: self.steps_started.load(Ordering::Relaxed),
            steps_ok: self.steps_ok.load(Ordering::Relaxed),
            steps_blocked: self.steps_blocked.load(Ordering::Relaxed),
            steps_failed: self.steps_failed.load(Ordering::Relaxed),
            recorder_errors: self.recorder_errors.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run) rather than per step.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            steps_started = s.steps_started,
            steps_ok = s.steps_ok,
            steps_blocked = s.steps_blocked,
            steps_failed = s.steps_failed,
            recorder_errors = s.recorder_errors,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.steps_started.store(0, Ordering::Relaxed);
        self.steps_ok.store(0, Ordering::Relaxed);
        self.steps_blocked.store(0, Ordering::Relaxed);
        self.steps_failed.store(0, Ordering::Relaxed);
        self.recorder_errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = ExecutorMetrics::new();
        m.inc_started();
        m.inc_started();
        m.inc_ok();
        m.inc_blocked();
        let s = m.snapshot();
        assert_eq!(s.steps_started, 2);
        assert_eq!(s.steps_ok, 1);
        assert_eq!(s.steps_blocked, 1);
        assert_eq!(s.steps_failed, 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = ExecutorMetrics::new();
        m.inc_failed();
        m.inc_recorder_errors();
        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
