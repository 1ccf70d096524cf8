//! Structured observability hooks for run lifecycle events.
//!
//! Every event carries an `event` field (`run.started`, `node.dispatched`,
//! ...) plus the `run_id`, so logs can be filtered per run.

use tracing::{info, warn};

/// Span wrapping everything a run does. Attach with
/// `tracing::Instrument::instrument`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("foreman.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, goal: &str) {
    info!(event = "run.started", run_id = %run_id, goal = %goal);
}

/// Emit event: run reached a terminal state.
pub fn emit_run_finished(run_id: &str, status: &str, duration_ms: u64, outcomes: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        duration_ms = duration_ms,
        outcomes = outcomes,
    );
}

pub fn emit_plan_created(run_id: &str, leaves: usize) {
    info!(event = "plan.created", run_id = %run_id, leaves = leaves);
}

pub fn emit_node_dispatched(run_id: &str, node: &str, capability: &str) {
    info!(event = "node.dispatched", run_id = %run_id, node = %node, capability = %capability);
}

pub fn emit_node_verified(run_id: &str, node: &str, verdict: &str) {
    info!(event = "node.verified", run_id = %run_id, node = %node, verdict = %verdict);
}

pub fn emit_replanned(run_id: &str, failed: &str, corrective: Option<&str>) {
    info!(
        event = "plan.replanned",
        run_id = %run_id,
        failed = %failed,
        corrective = corrective.unwrap_or("none"),
    );
}

/// Emit event: the interlock refused an invocation.
pub fn emit_safety_denied(run_id: &str, tool_id: &str, rule_id: &str) {
    warn!(event = "safety.denied", run_id = %run_id, tool_id = %tool_id, rule_id = %rule_id);
}

/// Emit event: persisting run state failed. The run continues.
pub fn emit_persist_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.persist_error", run_id = %run_id, error = %error);
}
