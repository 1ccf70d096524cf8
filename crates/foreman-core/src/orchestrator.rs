//! Orchestrator: the control loop that drives one run to a terminal state.
//!
//! The loop owns the task forest. Executors run as tasks in a `JoinSet` and
//! hand their outcomes back through it, so the forest has a single writer.
//! After every mutation the loop publishes a [`RunStatusReport`] on a watch
//! channel and persists the forest and new audit entries.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use foreman_state::{RunId, RunSnapshot, RunStatus, RunStore, StorageError};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, warn, Instrument};

use crate::approval::ApprovalRequest;
use crate::audit::{AuditEvent, DenialRecord};
use crate::domain::{
    FailureDetail, FailureKind, Feedback, ForestCounts, Goal, InvocationRecord, NodeId,
    NodeState, Outcome, TaskForest,
};
use crate::executor::{Executor, ExecutorError, SubTaskSpec};
use crate::metrics::METRICS;
use crate::obs;
use crate::planner::{Planner, ReplanOutcome};
use crate::run::RunContext;
use crate::safety::BreakerState;
use crate::verifier::{Verdict, Verifier};

/// Upper bound on parallelism derived from tool quotas.
pub const MAX_DERIVED_PARALLELISM: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Executors in flight at once. Derived from the registry when unset.
    pub max_parallelism: Option<usize>,
    /// Times a node may be requeued after `needs-retry` before it fails.
    pub max_retries: u32,
    /// How long in-flight executors get to wind down after cancellation.
    pub cancel_grace_ms: u64,
    /// Finished runs the service keeps in memory. Older ones remain in the store.
    pub retained_runs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: None,
            max_retries: 3,
            cancel_grace_ms: 5_000,
            retained_runs: 256,
        }
    }
}

/// Parallelism from the summed tool quota, clamped to `1..=16`.
pub fn derive_parallelism(total_concurrency: usize) -> usize {
    total_concurrency.clamp(1, MAX_DERIVED_PARALLELISM)
}

/// Why a run did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    /// Failure of the deepest node behind a `planning-exhausted` run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureKind>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl RunFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            cause: None,
            message: message.into(),
            node_id: None,
            rule_id: None,
        }
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(cause) = self.cause {
            write!(f, " ({cause})")?;
        }
        if let Some(node) = self.node_id {
            write!(f, " at {node}")?;
        }
        if let Some(rule) = &self.rule_id {
            write!(f, " [rule {rule}]")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub run_id: RunId,
    pub goal: Goal,
    pub status: RunStatus,
    /// `None` until planning succeeds.
    pub forest: Option<TaskForest>,
    /// Latest outcome per node.
    pub outcomes: Vec<Outcome>,
    pub denials: Vec<DenialRecord>,
    /// Every tool invocation actually performed, in audit order.
    pub attempted: Vec<InvocationRecord>,
    pub pending_approvals: Vec<ApprovalRequest>,
    pub failure: Option<RunFailure>,
    pub breaker: BreakerState,
    pub counts: ForestCounts,
    pub updated_at: DateTime<Utc>,
}

impl RunStatusReport {
    pub fn accepted(run_id: RunId, goal: Goal) -> Self {
        Self {
            run_id,
            goal,
            status: RunStatus::Accepted,
            forest: None,
            outcomes: Vec::new(),
            denials: Vec::new(),
            attempted: Vec::new(),
            pending_approvals: Vec::new(),
            failure: None,
            breaker: BreakerState::Closed,
            counts: ForestCounts::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

type Panic = Box<dyn Any + Send>;
type TaskOutput = (NodeId, Result<Result<Outcome, ExecutorError>, Panic>);

enum LoopEvent {
    Joined(Option<Result<TaskOutput, JoinError>>),
    Cancelled,
    DeadlinePassed,
}

pub struct Orchestrator {
    planner: Arc<Planner>,
    executor: Arc<Executor>,
    verifier: Verifier,
    store: Arc<dyn RunStore>,
    config: OrchestratorConfig,
    max_parallelism: usize,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<Planner>,
        executor: Arc<Executor>,
        store: Arc<dyn RunStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let max_parallelism = config
            .max_parallelism
            .unwrap_or_else(|| derive_parallelism(planner.registry().total_concurrency()))
            .max(1);
        Self {
            planner,
            executor,
            verifier: Verifier::new(),
            store,
            config,
            max_parallelism,
        }
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn planner(&self) -> &Arc<Planner> {
        &self.planner
    }

    /// Drive `run` to a terminal state and return the final report.
    pub async fn run(
        &self,
        run: Arc<RunContext>,
        status: watch::Sender<RunStatusReport>,
    ) -> RunStatusReport {
        let span = obs::run_span(run.run_id.as_str());
        self.drive(run, status).instrument(span).await
    }

    async fn drive(
        &self,
        run: Arc<RunContext>,
        status: watch::Sender<RunStatusReport>,
    ) -> RunStatusReport {
        let started = Instant::now();
        METRICS.inc_runs_started();
        obs::emit_run_started(run.run_id.as_str(), &run.goal.description);

        let mut driver = Driver::new(self, run, status);
        driver.create_record().await;
        let (status, failure) = driver.execute().await;
        driver.finish(status, failure, started).await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("max_parallelism", &self.max_parallelism)
            .finish_non_exhaustive()
    }
}

/// Mutable state of one run, owned by the run task.
struct Driver<'a> {
    orch: &'a Orchestrator,
    run: Arc<RunContext>,
    status_tx: watch::Sender<RunStatusReport>,
    report: RunStatusReport,
    forest: Option<TaskForest>,
    outcomes: BTreeMap<NodeId, Outcome>,
    /// Branch failures with the depth of the failed node.
    branch_failures: Vec<(usize, RunFailure)>,
    audit_cursor: u64,
    in_flight: JoinSet<TaskOutput>,
}

impl<'a> Driver<'a> {
    fn new(
        orch: &'a Orchestrator,
        run: Arc<RunContext>,
        status_tx: watch::Sender<RunStatusReport>,
    ) -> Self {
        let report = RunStatusReport::accepted(run.run_id.clone(), run.goal.clone());
        Self {
            orch,
            run,
            status_tx,
            report,
            forest: None,
            outcomes: BTreeMap::new(),
            branch_failures: Vec::new(),
            audit_cursor: 0,
            in_flight: JoinSet::new(),
        }
    }

    fn run_id(&self) -> &str {
        self.run.run_id.as_str()
    }

    async fn create_record(&mut self) {
        let goal = match serde_json::to_value(&self.run.goal) {
            Ok(goal) => goal,
            Err(e) => {
                obs::emit_persist_error(self.run_id(), &e);
                return;
            }
        };
        if let Err(e) = self.orch.store.create_run(&self.run.run_id, goal).await {
            obs::emit_persist_error(self.run_id(), &e);
        }
    }

    async fn execute(&mut self) -> (RunStatus, Option<RunFailure>) {
        self.set_status(RunStatus::Planning);
        self.persist().await;

        let forest = match self.orch.planner.decompose(&self.run.goal) {
            Ok(forest) => forest,
            Err(e) => {
                warn!(run_id = %self.run.run_id, error = %e, "planning failed");
                return (
                    RunStatus::Failed,
                    Some(RunFailure::new(FailureKind::PlanningExhausted, e.to_string())),
                );
            }
        };
        obs::emit_plan_created(self.run_id(), forest.leaves().count());
        self.forest = Some(forest);
        self.set_status(RunStatus::Executing);
        self.persist().await;

        loop {
            if self.run.is_cancelled() {
                self.drain().await;
                return (RunStatus::Cancelled, None);
            }
            if self.run.goal.constraints.deadline_passed(Utc::now()) {
                self.drain().await;
                return (RunStatus::Failed, Some(self.deadline_failure()));
            }

            self.promote();
            match self.refresh_root() {
                NodeState::Succeeded => return (RunStatus::Completed, None),
                NodeState::Failed => {
                    self.drain().await;
                    return (RunStatus::Failed, Some(self.deepest_failure()));
                }
                _ => {}
            }

            self.dispatch();
            if self.in_flight.is_empty() {
                warn!(run_id = %self.run.run_id, "no runnable sub-tasks remain");
                return (
                    RunStatus::Failed,
                    Some(RunFailure::new(
                        FailureKind::PlanningExhausted,
                        "no runnable sub-tasks remain",
                    )),
                );
            }
            self.publish();
            self.persist().await;

            let cancel = self.run.cancel.clone();
            let remaining = self.deadline_remaining();
            let event = tokio::select! {
                joined = self.in_flight.join_next() => LoopEvent::Joined(joined),
                _ = cancel.cancelled() => LoopEvent::Cancelled,
                _ = tokio::time::sleep(remaining.unwrap_or(Duration::ZERO)), if remaining.is_some() => {
                    LoopEvent::DeadlinePassed
                }
            };

            match event {
                LoopEvent::Joined(Some(joined)) => {
                    if let Err(failure) = self.on_joined(joined) {
                        self.drain().await;
                        return (RunStatus::Failed, Some(failure));
                    }
                    self.persist().await;
                }
                LoopEvent::Joined(None) | LoopEvent::Cancelled => {}
                LoopEvent::DeadlinePassed => {
                    self.drain().await;
                    return (RunStatus::Failed, Some(self.deadline_failure()));
                }
            }
        }
    }

    async fn finish(
        mut self,
        status: RunStatus,
        failure: Option<RunFailure>,
        started: Instant,
    ) -> RunStatusReport {
        if let Some(failure) = &failure {
            warn!(run_id = %self.run.run_id, failure = %failure, "run did not complete");
        }
        match status {
            RunStatus::Completed => METRICS.inc_runs_completed(),
            RunStatus::Failed => METRICS.inc_runs_failed(),
            _ => {}
        }
        // Persist before publishing so waiters observe a durable terminal state.
        self.report.failure = failure;
        self.run.audit.record(AuditEvent::RunStatus {
            status: status.to_string(),
        });
        self.report.status = status;
        self.persist().await;
        self.publish();

        obs::emit_run_finished(
            self.run_id(),
            &status.to_string(),
            started.elapsed().as_millis() as u64,
            self.outcomes.len(),
        );
        self.report.clone()
    }

    fn set_status(&mut self, status: RunStatus) {
        if self.report.status != status {
            self.run.audit.record(AuditEvent::RunStatus {
                status: status.to_string(),
            });
        }
        self.report.status = status;
        self.publish();
    }

    fn publish(&mut self) {
        self.report.forest = self.forest.clone();
        self.report.counts = self
            .forest
            .as_ref()
            .map(TaskForest::counts)
            .unwrap_or_default();
        self.report.outcomes = self.outcomes.values().cloned().collect();
        self.report.denials = self.run.audit.denials();
        self.report.attempted = self.run.audit.invocations(None);
        self.report.breaker = self.run.interlock.breaker_state();
        self.report.updated_at = Utc::now();
        self.status_tx.send_replace(self.report.clone());
    }

    /// Append new audit entries, then save the snapshot.
    async fn persist(&mut self) {
        let store = Arc::clone(&self.orch.store);
        for entry in self.run.audit.since(self.audit_cursor) {
            let result = match entry.to_record() {
                Ok(record) => store.append_audit(&self.run.run_id, record).await,
                Err(e) => Err(StorageError::Serialization(e)),
            };
            match result {
                Ok(()) => self.audit_cursor = entry.seq,
                Err(StorageError::Serialization(e)) => {
                    obs::emit_persist_error(self.run_id(), &e);
                    self.audit_cursor = entry.seq;
                }
                Err(e) => {
                    obs::emit_persist_error(self.run_id(), &e);
                    break;
                }
            }
        }

        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                obs::emit_persist_error(self.run_id(), &e);
                return;
            }
        };
        if let Err(e) = store.save_snapshot(&self.run.run_id, snapshot).await {
            obs::emit_persist_error(self.run_id(), &e);
        }
    }

    fn snapshot(&self) -> Result<RunSnapshot, serde_json::Error> {
        Ok(RunSnapshot {
            status: self.report.status,
            forest: match &self.forest {
                Some(forest) => serde_json::to_value(forest)?,
                None => serde_json::Value::Null,
            },
            failure: self
                .report
                .failure
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        })
    }

    fn refresh_root(&mut self) -> NodeState {
        self.forest
            .as_mut()
            .map(TaskForest::refresh_composites)
            .unwrap_or(NodeState::Failed)
    }

    fn transition(&mut self, id: NodeId, to: NodeState) -> bool {
        let Some(forest) = self.forest.as_mut() else {
            return false;
        };
        match forest.transition(id, to) {
            Ok(from) => {
                self.run.audit.record(AuditEvent::NodeTransition {
                    node_id: id,
                    from,
                    to,
                });
                true
            }
            Err(e) => {
                error!(run_id = %self.run.run_id, node = %id, error = %e, "rejected node transition");
                false
            }
        }
    }

    fn promote(&mut self) {
        let Some(forest) = self.forest.as_mut() else {
            return;
        };
        for id in forest.promote_ready() {
            self.run.audit.record(AuditEvent::NodeTransition {
                node_id: id,
                from: NodeState::Pending,
                to: NodeState::Ready,
            });
        }
    }

    fn dispatch(&mut self) {
        while self.in_flight.len() < self.orch.max_parallelism {
            let Some(forest) = self.forest.as_ref() else {
                return;
            };
            let Some(id) = forest.next_ready() else {
                return;
            };
            let Some(spec) = SubTaskSpec::from_forest(forest, id) else {
                self.transition(id, NodeState::Failed);
                continue;
            };
            if !self.transition(id, NodeState::Running) {
                return;
            }
            obs::emit_node_dispatched(self.run_id(), &id.to_string(), &spec.capability);

            let executor = Arc::clone(&self.orch.executor);
            let run = Arc::clone(&self.run);
            self.in_flight.spawn(
                async move {
                    let result = AssertUnwindSafe(executor.execute(&run, &spec))
                        .catch_unwind()
                        .await;
                    (id, result)
                }
                .in_current_span(),
            );
        }
    }

    /// Apply one finished executor task. `Err` aborts the run.
    fn on_joined(&mut self, joined: Result<TaskOutput, JoinError>) -> Result<(), RunFailure> {
        let (id, result) = match joined {
            Ok(output) => output,
            Err(e) => {
                error!(run_id = %self.run.run_id, error = %e, "executor task failed to join");
                return Ok(());
            }
        };
        match result {
            Ok(Ok(outcome)) => {
                self.apply(id, outcome);
                Ok(())
            }
            Ok(Err(ExecutorError::Context(e))) => {
                self.transition(id, NodeState::Failed);
                let mut failure = RunFailure::new(FailureKind::ContextProvision, e.to_string());
                failure.node_id = Some(id);
                Err(failure)
            }
            Err(_) => {
                error!(run_id = %self.run.run_id, node = %id, "executor panicked");
                let outcome = Outcome::failed(
                    id,
                    FailureDetail::new(FailureKind::ToolFailed, "executor panicked"),
                    Vec::new(),
                );
                self.apply(id, outcome);
                Ok(())
            }
        }
    }

    fn apply(&mut self, id: NodeId, outcome: Outcome) {
        let Some(node) = self.forest.as_ref().and_then(|f| f.node(id)).cloned() else {
            return;
        };
        self.report.status = RunStatus::Verifying;
        self.publish();

        let verdict = self.orch.verifier.verify(&node, &outcome);
        obs::emit_node_verified(self.run_id(), &id.to_string(), verdict.label());
        let payload = outcome.payload.clone();
        self.outcomes.insert(id, outcome);

        match verdict {
            Verdict::Accepted => {
                if let Some(n) = self.forest.as_mut().and_then(|f| f.node_mut(id)) {
                    n.payload = payload;
                }
                self.transition(id, NodeState::Succeeded);
            }
            Verdict::NeedsRetry { feedback } => {
                let retries = match self.forest.as_mut().and_then(|f| f.node_mut(id)) {
                    Some(n) => {
                        n.retries += 1;
                        n.feedback = Some(feedback.clone());
                        n.retries
                    }
                    None => return,
                };
                self.transition(id, NodeState::NeedsRetry);
                if retries < self.orch.config.max_retries {
                    debug!(run_id = %self.run.run_id, node = %id, retries, "requeueing sub-task");
                    self.transition(id, NodeState::Ready);
                } else {
                    self.transition(id, NodeState::Failed);
                    self.replan(id, feedback);
                }
            }
            Verdict::Rejected { feedback } => {
                if let Some(n) = self.forest.as_mut().and_then(|f| f.node_mut(id)) {
                    n.feedback = Some(feedback.clone());
                }
                self.transition(id, NodeState::Failed);
                self.replan(id, feedback);
            }
        }

        self.report.status = RunStatus::Executing;
        self.publish();
    }

    fn replan(&mut self, failed: NodeId, feedback: Feedback) {
        let Some(forest) = self.forest.as_mut() else {
            return;
        };
        let reason = match self.orch.planner.replan(forest, failed, &feedback) {
            Ok(ReplanOutcome::Corrective(corrective)) => {
                METRICS.inc_replans();
                self.run.audit.record(AuditEvent::Replanned {
                    failed,
                    corrective: Some(corrective),
                    reason: feedback.detail.clone(),
                });
                obs::emit_replanned(self.run_id(), &failed.to_string(), Some(&corrective.to_string()));
                return;
            }
            Ok(ReplanOutcome::BranchFailed { reason }) => reason,
            Err(e) => {
                warn!(run_id = %self.run.run_id, node = %failed, error = %e, "replanning refused");
                e.to_string()
            }
        };

        self.run.audit.record(AuditEvent::Replanned {
            failed,
            corrective: None,
            reason: reason.clone(),
        });
        obs::emit_replanned(self.run_id(), &failed.to_string(), None);

        let depth = self.forest.as_ref().map_or(0, |f| node_depth(f, failed));
        self.branch_failures.push((
            depth,
            RunFailure {
                kind: FailureKind::PlanningExhausted,
                cause: feedback.failure,
                message: reason,
                node_id: Some(failed),
                rule_id: feedback.rule_id,
            },
        ));
    }

    /// The failure recorded for the deepest node; the earliest one on ties.
    fn deepest_failure(&self) -> RunFailure {
        let mut best: Option<&(usize, RunFailure)> = None;
        for entry in &self.branch_failures {
            if best.map_or(true, |b| entry.0 > b.0) {
                best = Some(entry);
            }
        }
        best.map(|(_, f)| f.clone()).unwrap_or_else(|| {
            RunFailure::new(FailureKind::PlanningExhausted, "goal could not be completed")
        })
    }

    fn deadline_remaining(&self) -> Option<Duration> {
        self.run
            .goal
            .constraints
            .deadline
            .map(|d| (d - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    fn deadline_failure(&self) -> RunFailure {
        let message = match self.run.goal.constraints.deadline {
            Some(d) => format!("goal deadline {d} passed"),
            None => "goal deadline passed".to_string(),
        };
        RunFailure::new(FailureKind::DeadlineExceeded, message)
    }

    /// Cancel in-flight executors, wait out the grace period, then abort.
    ///
    /// Aborted tasks drop their context leases, which tears the contexts
    /// down. Nodes still running afterwards are marked failed.
    async fn drain(&mut self) {
        if !self.in_flight.is_empty() {
            self.run.cancel.cancel();
            let grace = Instant::now() + Duration::from_millis(self.orch.config.cancel_grace_ms);
            loop {
                let joined = tokio::select! {
                    joined = self.in_flight.join_next() => joined,
                    _ = tokio::time::sleep_until(grace) => break,
                };
                match joined {
                    Some(joined) => self.record_drained(joined),
                    None => break,
                }
            }
            if !self.in_flight.is_empty() {
                warn!(
                    run_id = %self.run.run_id,
                    remaining = self.in_flight.len(),
                    "grace period elapsed, aborting executors"
                );
                self.in_flight.abort_all();
                while let Some(joined) = self.in_flight.join_next().await {
                    self.record_drained(joined);
                }
            }
        }

        let running: Vec<NodeId> = self
            .forest
            .as_ref()
            .map(|f| {
                f.active_leaves()
                    .filter(|n| n.state == NodeState::Running)
                    .map(|n| n.id)
                    .collect()
            })
            .unwrap_or_default();
        for id in running {
            self.transition(id, NodeState::Failed);
        }
        self.refresh_root();
    }

    fn record_drained(&mut self, joined: Result<TaskOutput, JoinError>) {
        let Ok((id, Ok(Ok(outcome)))) = joined else {
            return;
        };
        let to = if outcome.success {
            NodeState::Succeeded
        } else {
            NodeState::Failed
        };
        if outcome.success {
            if let Some(n) = self.forest.as_mut().and_then(|f| f.node_mut(id)) {
                n.payload = outcome.payload.clone();
            }
        }
        self.outcomes.insert(id, outcome);
        self.transition(id, to);
    }
}

fn node_depth(forest: &TaskForest, id: NodeId) -> usize {
    let mut depth = 0;
    let mut current = forest.node(id).and_then(|n| n.parent);
    while let Some(parent) = current {
        depth += 1;
        current = forest.node(parent).and_then(|n| n.parent);
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_parallelism_clamps() {
        assert_eq!(derive_parallelism(0), 1);
        assert_eq!(derive_parallelism(5), 5);
        assert_eq!(derive_parallelism(40), MAX_DERIVED_PARALLELISM);
    }

    #[test]
    fn test_run_failure_display() {
        let failure = RunFailure {
            kind: FailureKind::PlanningExhausted,
            cause: Some(FailureKind::SafetyDenied),
            message: "non-recoverable failure".into(),
            node_id: Some(NodeId(2)),
            rule_id: Some("goal-safety-tier".into()),
        };
        assert_eq!(
            failure.to_string(),
            "planning-exhausted (safety-denied) at n2 [rule goal-safety-tier]: non-recoverable failure"
        );
    }

    #[test]
    fn test_node_depth() {
        let mut forest = TaskForest::new("g", "goal");
        let group = forest.add_composite(forest.root, "group", "group").unwrap();
        let leaf = forest.add_leaf(group, "fetch", "fetch", vec![], vec![]).unwrap();
        assert_eq!(node_depth(&forest, forest.root), 0);
        assert_eq!(node_depth(&forest, leaf), 2);
    }

    #[test]
    fn test_report_starts_accepted() {
        let goal = Goal::accept(crate::domain::GoalRequest::new("fetch x")).unwrap();
        let report = RunStatusReport::accepted(RunId::new(), goal);
        assert_eq!(report.status, RunStatus::Accepted);
        assert!(!report.is_terminal());
        assert!(report.forest.is_none());
    }
}
