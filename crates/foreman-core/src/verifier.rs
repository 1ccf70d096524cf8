//! Verifier: checks an outcome against its sub-task's acceptance criteria.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    Criterion, FailureKind, Feedback, InvocationResult, Outcome, SubTask,
};

/// Verifier decision for one outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// All criteria hold; the node succeeds.
    Accepted,
    /// Worth another attempt; the feedback says what went wrong.
    NeedsRetry { feedback: Feedback },
    /// No attempt at this node can succeed as planned.
    Rejected { feedback: Feedback },
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::NeedsRetry { .. } => "needs_retry",
            Self::Rejected { .. } => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(&self, node: &SubTask, outcome: &Outcome) -> Verdict {
        if !outcome.success {
            return self.classify_failure(outcome);
        }

        let payload = outcome.payload.as_ref().unwrap_or(&Value::Null);
        let producer: Vec<String> = outcome
            .invocations
            .iter()
            .rev()
            .find(|i| i.result == InvocationResult::Succeeded)
            .map(|i| vec![i.tool_id.clone()])
            .unwrap_or_default();

        for criterion in &node.acceptance {
            let failed = match criterion {
                Criterion::ToolSucceeded => None,
                Criterion::NonEmptyPayload if is_empty(payload) => {
                    Some("tool returned an empty payload".to_string())
                }
                Criterion::NonEmptyPayload => None,
                Criterion::FieldsPresent { fields } => fields
                    .iter()
                    .find(|f| payload.get(f.as_str()).is_none())
                    .map(|f| format!("payload is missing field '{f}'")),
                Criterion::BeforeDeadline { deadline } => {
                    if outcome.finished_at > *deadline {
                        return Verdict::Rejected {
                            feedback: Feedback {
                                criterion: criterion.name().to_string(),
                                detail: format!("finished after the goal deadline {deadline}"),
                                recoverable: false,
                                blamed_tools: Vec::new(),
                                failure: Some(FailureKind::DeadlineExceeded),
                                rule_id: None,
                            },
                        };
                    }
                    None
                }
            };
            if let Some(detail) = failed {
                return Verdict::NeedsRetry {
                    feedback: Feedback {
                        criterion: criterion.name().to_string(),
                        detail,
                        recoverable: true,
                        blamed_tools: producer,
                        failure: None,
                        rule_id: None,
                    },
                };
            }
        }
        Verdict::Accepted
    }

    fn classify_failure(&self, outcome: &Outcome) -> Verdict {
        let (kind, detail, rule_id) = match &outcome.error {
            Some(e) => (e.kind, e.message.clone(), e.rule_id.clone()),
            None => (FailureKind::ToolFailed, "outcome carried no error".to_string(), None),
        };
        let feedback = Feedback {
            criterion: Criterion::ToolSucceeded.name().to_string(),
            detail,
            recoverable: false,
            blamed_tools: outcome.failed_tools(),
            failure: Some(kind),
            rule_id,
        };
        match kind {
            FailureKind::ToolFailed | FailureKind::Timeout => Verdict::NeedsRetry {
                feedback: Feedback {
                    recoverable: true,
                    ..feedback
                },
            },
            _ => Verdict::Rejected { feedback },
        }
    }
}

fn is_empty(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
