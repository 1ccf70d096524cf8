//! Global atomic counters for Foreman observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters: no allocations, no locking.
pub struct Metrics {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    tool_invocations: AtomicU64,
    tool_failures: AtomicU64,
    safety_denials: AtomicU64,
    replans: AtomicU64,
    contexts_acquired: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            tool_invocations: AtomicU64::new(0),
            tool_failures: AtomicU64::new(0),
            safety_denials: AtomicU64::new(0),
            replans: AtomicU64::new(0),
            contexts_acquired: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    pub fn inc_runs_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_completed", "counter incremented");
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_failed", "counter incremented");
    }

    /// Count one tool invocation that actually ran.
    pub fn inc_tool_invocations(&self) {
        self.tool_invocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tool_invocations", "counter incremented");
    }

    pub fn inc_tool_failures(&self) {
        self.tool_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tool_failures", "counter incremented");
    }

    pub fn inc_safety_denials(&self) {
        self.safety_denials.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "safety_denials", "counter incremented");
    }

    pub fn inc_replans(&self) {
        self.replans.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "replans", "counter incremented");
    }

    pub fn inc_contexts_acquired(&self) {
        self.contexts_acquired.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "contexts_acquired", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run, CLI exit)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            runs_completed = self.runs_completed(),
            runs_failed = self.runs_failed(),
            tool_invocations = self.tool_invocations(),
            tool_failures = self.tool_failures(),
            safety_denials = self.safety_denials(),
            replans = self.replans(),
            contexts_acquired = self.contexts_acquired(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn tool_invocations(&self) -> u64 {
        self.tool_invocations.load(Ordering::Relaxed)
    }

    pub fn tool_failures(&self) -> u64 {
        self.tool_failures.load(Ordering::Relaxed)
    }

    pub fn safety_denials(&self) -> u64 {
        self.safety_denials.load(Ordering::Relaxed)
    }

    pub fn replans(&self) -> u64 {
        self.replans.load(Ordering::Relaxed)
    }

    pub fn contexts_acquired(&self) -> u64 {
        self.contexts_acquired.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.runs_started,
            &self.runs_completed,
            &self.runs_failed,
            &self.tool_invocations,
            &self.tool_failures,
            &self.safety_denials,
            &self.replans,
            &self.contexts_acquired,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
