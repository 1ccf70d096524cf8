//! What an executor reports back for a sub-task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::forest::NodeId;

/// Coarse failure class carried on outcomes, feedback and run failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    NoCapableTool,
    SafetyDenied,
    ToolFailed,
    Timeout,
    Cancelled,
    ContextProvision,
    PlanningExhausted,
    DeadlineExceeded,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoCapableTool => "no-capable-tool",
            Self::SafetyDenied => "safety-denied",
            Self::ToolFailed => "tool-failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ContextProvision => "context-provision",
            Self::PlanningExhausted => "planning-exhausted",
            Self::DeadlineExceeded => "deadline-exceeded",
        };
        f.write_str(s)
    }
}

/// Result of one attempt to invoke a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum InvocationResult {
    Succeeded,
    Transient { message: String },
    Permanent { message: String },
    Harmful { message: String },
    /// Blocked by the interlock before the tool ran.
    Denied { rule_id: String, reason: String },
    Cancelled,
}

impl InvocationResult {
    /// Whether the tool was actually run. Denials are not invocations.
    pub fn was_performed(&self) -> bool {
        !matches!(self, Self::Denied { .. })
    }
}

/// One entry of an outcome's invocation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub invocation_id: String,
    pub tool_id: String,
    /// 1-based attempt number within the sub-task.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub result: InvocationResult,
}

/// Why a sub-task attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    /// Rule that produced the last denial, when `kind` is `SafetyDenied`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Per-tool error messages in attempt order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl FailureDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            rule_id: None,
            errors: Vec::new(),
        }
    }
}

/// Executor report for one sub-task attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub node_id: NodeId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
    pub invocations: Vec<InvocationRecord>,
    pub finished_at: DateTime<Utc>,
}

impl Outcome {
    pub fn succeeded(node_id: NodeId, payload: Value, invocations: Vec<InvocationRecord>) -> Self {
        Self {
            node_id,
            success: true,
            payload: Some(payload),
            error: None,
            invocations,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        node_id: NodeId,
        error: FailureDetail,
        invocations: Vec<InvocationRecord>,
    ) -> Self {
        Self {
            node_id,
            success: false,
            payload: None,
            error: Some(error),
            invocations,
            finished_at: Utc::now(),
        }
    }

    /// Tool ids whose invocations failed, deduplicated in first-seen order.
    pub fn failed_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for inv in &self.invocations {
            let failed = matches!(
                inv.result,
                InvocationResult::Transient { .. }
                    | InvocationResult::Permanent { .. }
                    | InvocationResult::Harmful { .. }
            );
            if failed && !tools.contains(&inv.tool_id) {
                tools.push(inv.tool_id.clone());
            }
        }
        tools
    }

    /// Number of invocations that actually ran a tool.
    pub fn performed_invocations(&self) -> usize {
        self.invocations
            .iter()
            .filter(|i| i.result.was_performed())
            .count()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
