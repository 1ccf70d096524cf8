//! Executor: carries out one leaf sub-task.
//!
//! Picks candidate tools from the gateway, runs them inside a fresh execution
//! context, retries transient failures with exponential backoff and moves on
//! to the next candidate after permanent failures or denials. Executors see a
//! snapshot of their sub-task and never touch the forest.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::context::{ContextError, ContextManager};
use crate::domain::tool::{specificity, tag_matches};
use crate::domain::{
    Feedback, FailureDetail, FailureKind, InvocationRecord, InvocationResult, NodeId, Outcome,
    TaskForest,
};
use crate::gateway::{InvocationRequest, ToolGateway};
use crate::run::RunContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Total tool invocations allowed per sub-task attempt. Denials do not count.
    pub max_retries: u32,
    /// Extra attempts on the same tool after a transient failure.
    pub transient_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: u32,
    pub backoff_cap_ms: u64,
    /// Time allowed for one sub-task attempt, excluding approval waits.
    pub timeout_ms: u64,
    /// Per-capability overrides of `timeout_ms`; the most specific match wins.
    pub capability_timeouts_ms: BTreeMap<String, u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            transient_retries: 2,
            backoff_base_ms: 500,
            backoff_factor: 2,
            backoff_cap_ms: 8_000,
            timeout_ms: 60_000,
            capability_timeouts_ms: BTreeMap::new(),
        }
    }
}

impl ExecutorConfig {
    /// Delay before the `retry`-th retry (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = u64::from(self.backoff_factor.max(1)).saturating_pow(retry);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }

    pub fn timeout_for(&self, capability: &str) -> Duration {
        let ms = self
            .capability_timeouts_ms
            .iter()
            .filter(|(tag, _)| tag_matches(tag, capability))
            .max_by_key(|(tag, _)| specificity(tag))
            .map(|(_, ms)| *ms)
            .unwrap_or(self.timeout_ms);
        Duration::from_millis(ms)
    }
}

/// Read-only view of a leaf handed to an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskSpec {
    pub node_id: NodeId,
    pub capability: String,
    pub clause: String,
    pub excluded_tools: BTreeSet<String>,
    pub feedback: Option<Feedback>,
    /// Payloads of succeeded prerequisites, keyed by capability.
    pub upstream: BTreeMap<String, Value>,
}

impl SubTaskSpec {
    /// Snapshot a leaf. `None` for composites and unknown ids.
    pub fn from_forest(forest: &TaskForest, node_id: NodeId) -> Option<Self> {
        let node = forest.node(node_id)?;
        Some(Self {
            node_id,
            capability: node.capability.clone()?,
            clause: node.clause.clone(),
            excluded_tools: node.excluded_tools.clone(),
            feedback: node.feedback.clone(),
            upstream: forest.upstream_payloads(node_id),
        })
    }
}

/// Infrastructure failures that abort the run rather than the sub-task.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Context(#[from] ContextError),
}

#[derive(Debug)]
pub struct Executor {
    gateway: Arc<ToolGateway>,
    contexts: ContextManager,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(gateway: Arc<ToolGateway>, contexts: ContextManager, config: ExecutorConfig) -> Self {
        Self {
            gateway,
            contexts,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    #[instrument(skip(self, run, task), fields(run_id = %run.run_id, node = %task.node_id, capability = %task.capability))]
    pub async fn execute(&self, run: &RunContext, task: &SubTaskSpec) -> Result<Outcome, ExecutorError> {
        let candidates: Vec<_> = self
            .gateway
            .resolve(&task.capability)
            .into_iter()
            .filter(|d| !task.excluded_tools.contains(&d.id))
            .collect();
        if candidates.is_empty() {
            return Ok(Outcome::failed(
                task.node_id,
                FailureDetail::new(
                    FailureKind::NoCapableTool,
                    format!("no tool provides capability '{}'", task.capability),
                ),
                Vec::new(),
            ));
        }

        let lease = self.contexts.acquire(run.run_id.as_str())?;
        let mut deadline = self.deadline(run, &task.capability);
        let input = json!({
            "goal": run.goal.description,
            "clause": task.clause,
            "capability": task.capability,
            "upstream": task.upstream,
            "feedback": task.feedback,
        });

        let mut invocations: Vec<InvocationRecord> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut performed = 0u32;
        let mut last_denial: Option<String> = None;
        let mut timed_out = false;

        'tools: for tool in &candidates {
            let mut transient_retries = 0u32;
            loop {
                if performed >= self.config.max_retries {
                    break 'tools;
                }
                if run.is_cancelled() {
                    return Ok(cancelled(task.node_id, invocations));
                }
                if Instant::now() >= deadline {
                    timed_out = true;
                    break 'tools;
                }

                let result = self
                    .gateway
                    .invoke(
                        run,
                        InvocationRequest {
                            node_id: task.node_id,
                            attempt: invocations.len() as u32 + 1,
                            tool,
                            capability: &task.capability,
                            input: &input,
                            deadline,
                        },
                        lease.context(),
                    )
                    .await;
                deadline += result.approval_wait;
                let outcome_result = result.record.result.clone();
                invocations.push(result.record);

                match outcome_result {
                    InvocationResult::Succeeded => {
                        let payload = result.output.unwrap_or(Value::Null);
                        debug!(tool = %tool.id, performed = performed + 1, "sub-task succeeded");
                        return Ok(Outcome::succeeded(task.node_id, payload, invocations));
                    }
                    InvocationResult::Cancelled => {
                        return Ok(cancelled(task.node_id, invocations));
                    }
                    InvocationResult::Denied { rule_id, reason } => {
                        errors.push(format!("{}: denied by {rule_id}: {reason}", tool.id));
                        last_denial = Some(rule_id);
                        continue 'tools;
                    }
                    InvocationResult::Transient { message } => {
                        performed += 1;
                        errors.push(format!("{}: {message}", tool.id));
                        if transient_retries >= self.config.transient_retries
                            || performed >= self.config.max_retries
                        {
                            continue 'tools;
                        }
                        let delay = self
                            .config
                            .backoff(transient_retries)
                            .min(deadline.saturating_duration_since(Instant::now()));
                        transient_retries += 1;
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = run.cancel.cancelled() => {
                                return Ok(cancelled(task.node_id, invocations));
                            }
                        }
                    }
                    InvocationResult::Permanent { message } | InvocationResult::Harmful { message } => {
                        performed += 1;
                        errors.push(format!("{}: {message}", tool.id));
                        continue 'tools;
                    }
                }
            }
        }
        drop(lease);

        let mut detail = if timed_out {
            FailureDetail::new(
                FailureKind::Timeout,
                format!("sub-task exceeded its time budget after {performed} invocation(s)"),
            )
        } else if performed == 0 && last_denial.is_some() {
            let mut d = FailureDetail::new(
                FailureKind::SafetyDenied,
                "every candidate tool was denied by the safety interlock",
            );
            d.rule_id = last_denial;
            d
        } else {
            FailureDetail::new(
                FailureKind::ToolFailed,
                format!("{performed} invocation(s) failed"),
            )
        };
        detail.errors = errors;
        Ok(Outcome::failed(task.node_id, detail, invocations))
    }

    /// Sub-task deadline: the capability timeout, clipped by the goal deadline.
    fn deadline(&self, run: &RunContext, capability: &str) -> Instant {
        let now = Instant::now();
        let mut deadline = now + self.config.timeout_for(capability);
        if let Some(goal_deadline) = run.goal.constraints.deadline {
            let remaining = (goal_deadline - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            deadline = deadline.min(now + remaining);
        }
        deadline
    }
}

fn cancelled(node_id: NodeId, invocations: Vec<InvocationRecord>) -> Outcome {
    Outcome::failed(
        node_id,
        FailureDetail::new(FailureKind::Cancelled, "run cancelled"),
        invocations,
    )
}
