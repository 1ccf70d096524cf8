//! Proposed actions and safety decisions.

use serde::{Deserialize, Serialize};

use crate::domain::RiskLevel;

/// A tool invocation awaiting a safety decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub invocation_id: String,
    pub tool_id: String,
    /// The capability requirement the tool is being used for.
    pub capability: String,
    pub risk: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyVerdict {
    Allow,
    Deny,
    /// Allowed only after explicit human approval.
    Confirm,
}

impl std::fmt::Display for SafetyVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
            Self::Confirm => write!(f, "confirm"),
        }
    }
}

/// Verdict plus the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub verdict: SafetyVerdict,
    pub rule_id: String,
    pub reason: String,
}

impl SafetyDecision {
    pub fn deny(rule_id: &str, reason: impl Into<String>) -> Self {
        Self {
            verdict: SafetyVerdict::Deny,
            rule_id: rule_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.verdict == SafetyVerdict::Allow
    }
}
