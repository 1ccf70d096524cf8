//! Tool gateway: capability resolution and the single path by which tools run.
//!
//! Every invocation is checked by the run's safety interlock first, waits for
//! approval on `confirm`, has its input and output validated against the
//! tool's schemas, and is appended to the run's audit trail.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::approval::{ApprovalBroker, ApprovalRequest};
use crate::audit::AuditEvent;
use crate::context::ExecutionContext;
use crate::domain::{InvocationRecord, InvocationResult, NodeId, ToolDescriptor};
use crate::metrics::METRICS;
use crate::obs;
use crate::registry::ToolRegistry;
use crate::run::RunContext;
use crate::safety::{BreakerSignal, Evaluation, ProposedAction, SafetyDecision, SafetyVerdict};
use crate::tools::ToolError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// How long a `confirm` verdict waits for a human before counting as deny.
    pub approval_timeout_ms: u64,
    /// Upper bound on a single tool invocation.
    pub invocation_timeout_ms: u64,
    /// Number of recent results used for a tool's success rate.
    pub history_window: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            approval_timeout_ms: 600_000,
            invocation_timeout_ms: 30_000,
            history_window: 20,
        }
    }
}

/// One requested invocation.
#[derive(Debug, Clone, Copy)]
pub struct InvocationRequest<'a> {
    pub node_id: NodeId,
    /// 1-based attempt number within the sub-task.
    pub attempt: u32,
    pub tool: &'a ToolDescriptor,
    /// The capability requirement being served.
    pub capability: &'a str,
    pub input: &'a Value,
    /// The invocation must finish by this instant.
    pub deadline: Instant,
}

/// What happened, plus the payload on success.
#[derive(Debug, Clone)]
pub struct GatewayResult {
    pub record: InvocationRecord,
    pub output: Option<Value>,
    /// Time spent waiting for a human; not charged to the sub-task timeout.
    pub approval_wait: Duration,
}

enum ApprovalOutcome {
    Approved,
    Declined { timed_out: bool },
    Cancelled,
}

#[derive(Debug)]
pub struct ToolGateway {
    registry: Arc<ToolRegistry>,
    approvals: Arc<ApprovalBroker>,
    config: GatewayConfig,
    permits: HashMap<String, Arc<Semaphore>>,
    history: Mutex<HashMap<String, VecDeque<bool>>>,
}

impl ToolGateway {
    pub fn new(
        registry: Arc<ToolRegistry>,
        approvals: Arc<ApprovalBroker>,
        config: GatewayConfig,
    ) -> Self {
        let permits = registry
            .descriptors()
            .map(|d| {
                (
                    d.id.clone(),
                    Arc::new(Semaphore::new(d.max_concurrency as usize)),
                )
            })
            .collect();
        Self {
            registry,
            approvals,
            config,
            permits,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Success rate over the recent window; 1.0 with no history.
    pub fn success_rate(&self, tool_id: &str) -> f64 {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        match history.get(tool_id) {
            Some(window) if !window.is_empty() => {
                window.iter().filter(|ok| **ok).count() as f64 / window.len() as f64
            }
            _ => 1.0,
        }
    }

    fn record_history(&self, tool_id: &str, ok: bool) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let window = history.entry(tool_id.to_string()).or_default();
        window.push_back(ok);
        while window.len() > self.config.history_window {
            window.pop_front();
        }
    }

    /// Tools able to serve `requirement`, best first: most specific tag,
    /// then highest recent success rate, then id.
    pub fn resolve(&self, requirement: &str) -> Vec<ToolDescriptor> {
        let mut ranked: Vec<(ToolDescriptor, usize, f64)> = self
            .registry
            .candidates(requirement)
            .into_iter()
            .map(|(d, specificity)| (d.clone(), specificity, self.success_rate(&d.id)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.2.total_cmp(&a.2))
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        ranked.into_iter().map(|(d, _, _)| d).collect()
    }

    #[instrument(
        skip(self, run, request, ctx),
        fields(run_id = %run.run_id, node = %request.node_id, tool = %request.tool.id)
    )]
    pub async fn invoke(
        &self,
        run: &RunContext,
        request: InvocationRequest<'_>,
        ctx: &ExecutionContext,
    ) -> GatewayResult {
        let invocation_id = uuid::Uuid::new_v4().to_string();
        let tool = request.tool;
        let action = ProposedAction {
            invocation_id: invocation_id.clone(),
            tool_id: tool.id.clone(),
            capability: request.capability.to_string(),
            risk: tool.risk,
        };

        let Evaluation { decision, probe } = run.interlock.evaluate(&action);
        run.audit.record(AuditEvent::SafetyDecision {
            node_id: request.node_id,
            invocation_id: invocation_id.clone(),
            tool_id: tool.id.clone(),
            decision: decision.clone(),
        });

        let mut approval_wait = Duration::ZERO;
        match decision.verdict {
            SafetyVerdict::Allow => {}
            SafetyVerdict::Deny => {
                obs::emit_safety_denied(run.run_id.as_str(), &tool.id, &decision.rule_id);
                return self.not_run(
                    &request,
                    invocation_id,
                    InvocationResult::Denied {
                        rule_id: decision.rule_id,
                        reason: decision.reason,
                    },
                );
            }
            SafetyVerdict::Confirm => {
                let waited_from = Instant::now();
                let outcome = self
                    .await_approval(run, &request, &invocation_id, &decision)
                    .await;
                approval_wait = waited_from.elapsed();
                match outcome {
                    ApprovalOutcome::Approved => {}
                    ApprovalOutcome::Declined { timed_out } => {
                        if probe {
                            run.interlock.release_probe();
                        }
                        let reason = if timed_out {
                            "approval timed out"
                        } else {
                            "approval declined"
                        };
                        obs::emit_safety_denied(run.run_id.as_str(), &tool.id, &decision.rule_id);
                        METRICS.inc_safety_denials();
                        let mut result = self.not_run(
                            &request,
                            invocation_id,
                            InvocationResult::Denied {
                                rule_id: decision.rule_id,
                                reason: format!("{reason}: {}", decision.reason),
                            },
                        );
                        result.approval_wait = approval_wait;
                        return result;
                    }
                    ApprovalOutcome::Cancelled => {
                        if probe {
                            run.interlock.release_probe();
                        }
                        return self.not_run(&request, invocation_id, InvocationResult::Cancelled);
                    }
                }
            }
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let (result, output) = self
            .run_tool(run, &request, ctx, request.deadline + approval_wait)
            .await;

        let signal = match &result {
            InvocationResult::Succeeded => Some(BreakerSignal::Success),
            InvocationResult::Transient { .. } => Some(BreakerSignal::Transient),
            InvocationResult::Permanent { .. } => Some(BreakerSignal::Permanent),
            InvocationResult::Harmful { .. } => Some(BreakerSignal::Harmful),
            InvocationResult::Denied { .. } | InvocationResult::Cancelled => None,
        };
        match signal {
            Some(signal) => {
                run.interlock.record(&tool.id, signal, probe);
                self.record_history(&tool.id, signal == BreakerSignal::Success);
                if signal != BreakerSignal::Success {
                    METRICS.inc_tool_failures();
                }
            }
            None if probe => run.interlock.release_probe(),
            None => {}
        }
        METRICS.inc_tool_invocations();

        let record = InvocationRecord {
            invocation_id,
            tool_id: tool.id.clone(),
            attempt: request.attempt,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            result,
        };
        debug!(result = ?record.result, duration_ms = record.duration_ms, "tool invocation finished");
        run.audit.record(AuditEvent::ToolInvocation {
            node_id: request.node_id,
            record: record.clone(),
        });
        GatewayResult {
            record,
            output,
            approval_wait,
        }
    }

    /// Validate, wait for a concurrency slot, run, validate output.
    async fn run_tool(
        &self,
        run: &RunContext,
        request: &InvocationRequest<'_>,
        ctx: &ExecutionContext,
        deadline: Instant,
    ) -> (InvocationResult, Option<Value>) {
        let tool = request.tool;
        let Some(registered) = self.registry.get(&tool.id) else {
            return (
                InvocationResult::Permanent {
                    message: format!("tool {} is not registered", tool.id),
                },
                None,
            );
        };
        if let Some(field) = tool.input_schema.missing_field(request.input) {
            return (
                InvocationResult::Permanent {
                    message: format!("input missing required field '{field}'"),
                },
                None,
            );
        }

        let permit = match self.permits.get(&tool.id) {
            Some(sem) => {
                tokio::select! {
                    permit = Arc::clone(sem).acquire_owned() => permit.ok(),
                    _ = run.cancel.cancelled() => return (InvocationResult::Cancelled, None),
                }
            }
            None => None,
        };

        let budget = deadline
            .saturating_duration_since(Instant::now())
            .min(Duration::from_millis(self.config.invocation_timeout_ms));

        let outcome = tokio::select! {
            r = tokio::time::timeout(budget, registered.handler.invoke(tool, request.input, ctx)) => r,
            _ = run.cancel.cancelled() => return (InvocationResult::Cancelled, None),
        };
        drop(permit);

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => return (tool_error_result(err), None),
            Err(_) => {
                return (
                    InvocationResult::Transient {
                        message: format!("timed out after {}ms", budget.as_millis()),
                    },
                    None,
                )
            }
        };

        match tool.output_schema.missing_field(&value) {
            Some(field) => (
                InvocationResult::Permanent {
                    message: format!("output missing required field '{field}'"),
                },
                None,
            ),
            None => (InvocationResult::Succeeded, Some(value)),
        }
    }

    async fn await_approval(
        &self,
        run: &RunContext,
        request: &InvocationRequest<'_>,
        invocation_id: &str,
        decision: &SafetyDecision,
    ) -> ApprovalOutcome {
        let rx = self.approvals.request(ApprovalRequest {
            run_id: run.run_id.clone(),
            invocation_id: invocation_id.to_string(),
            tool_id: request.tool.id.clone(),
            capability: request.capability.to_string(),
            rule_id: decision.rule_id.clone(),
            reason: decision.reason.clone(),
            requested_at: Utc::now(),
        });
        run.audit.record(AuditEvent::ApprovalRequested {
            node_id: request.node_id,
            invocation_id: invocation_id.to_string(),
            tool_id: request.tool.id.clone(),
        });

        let timeout = Duration::from_millis(self.config.approval_timeout_ms);
        let (outcome, timed_out) = tokio::select! {
            answer = rx => match answer {
                Ok(true) => (ApprovalOutcome::Approved, false),
                _ => (ApprovalOutcome::Declined { timed_out: false }, false),
            },
            _ = tokio::time::sleep(timeout) => {
                self.approvals.withdraw(&run.run_id, invocation_id);
                (ApprovalOutcome::Declined { timed_out: true }, true)
            }
            _ = run.cancel.cancelled() => {
                self.approvals.withdraw(&run.run_id, invocation_id);
                return ApprovalOutcome::Cancelled;
            }
        };
        run.audit.record(AuditEvent::ApprovalResolved {
            node_id: request.node_id,
            invocation_id: invocation_id.to_string(),
            approved: matches!(outcome, ApprovalOutcome::Approved),
            timed_out,
        });
        outcome
    }

    fn not_run(
        &self,
        request: &InvocationRequest<'_>,
        invocation_id: String,
        result: InvocationResult,
    ) -> GatewayResult {
        GatewayResult {
            record: InvocationRecord {
                invocation_id,
                tool_id: request.tool.id.clone(),
                attempt: request.attempt,
                started_at: Utc::now(),
                duration_ms: 0,
                result,
            },
            output: None,
            approval_wait: Duration::ZERO,
        }
    }
}

fn tool_error_result(err: ToolError) -> InvocationResult {
    match err {
        ToolError::Transient(message) => InvocationResult::Transient { message },
        ToolError::Permanent(message) => InvocationResult::Permanent { message },
        ToolError::Harmful(message) => InvocationResult::Harmful { message },
    }
}
