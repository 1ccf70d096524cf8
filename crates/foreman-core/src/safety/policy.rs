//! Safety rules and rule sets.

use serde::{Deserialize, Serialize};

use crate::domain::tool::tag_matches;
use crate::domain::RiskLevel;

use super::request::{ProposedAction, SafetyDecision, SafetyVerdict};
use super::DEFAULT_DENY_RULE;

/// Conditions a rule matches on. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Matches the requested capability and anything below it in the tag
    /// hierarchy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
}

impl RuleMatch {
    pub fn matches(&self, action: &ProposedAction) -> bool {
        self.tool.as_ref().map_or(true, |t| *t == action.tool_id)
            && self
                .capability
                .as_ref()
                .map_or(true, |c| tag_matches(c, &action.capability))
            && self.risk.map_or(true, |r| r == action.risk)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyRule {
    pub id: String,
    /// Lower values are evaluated first; ties keep declaration order.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, rename = "match")]
    pub when: RuleMatch,
    pub verdict: SafetyVerdict,
    #[serde(default)]
    pub reason: String,
}

impl SafetyRule {
    pub fn new(id: impl Into<String>, priority: i32, when: RuleMatch, verdict: SafetyVerdict) -> Self {
        Self {
            id: id.into(),
            priority,
            when,
            verdict,
            reason: String::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    fn decision(&self) -> SafetyDecision {
        let reason = if self.reason.is_empty() {
            format!("matched rule {}", self.id)
        } else {
            self.reason.clone()
        };
        SafetyDecision {
            verdict: self.verdict,
            rule_id: self.id.clone(),
            reason,
        }
    }
}

/// Rules evaluated by priority, first match wins.
///
/// If no rule matches, the action is **denied**.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    pub rules: Vec<SafetyRule>,
}

impl PolicySet {
    /// No rules: everything is denied.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: SafetyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Allow low and elevated risk, require confirmation for irreversible.
    pub fn standard() -> Self {
        let by_risk = |risk| RuleMatch {
            risk: Some(risk),
            ..RuleMatch::default()
        };
        Self::empty()
            .with_rule(
                SafetyRule::new("allow-low", 100, by_risk(RiskLevel::Low), SafetyVerdict::Allow)
                    .with_reason("low-risk tools are allowed"),
            )
            .with_rule(
                SafetyRule::new(
                    "allow-elevated",
                    100,
                    by_risk(RiskLevel::Elevated),
                    SafetyVerdict::Allow,
                )
                .with_reason("elevated-risk tools are allowed"),
            )
            .with_rule(
                SafetyRule::new(
                    "confirm-irreversible",
                    100,
                    by_risk(RiskLevel::Irreversible),
                    SafetyVerdict::Confirm,
                )
                .with_reason("irreversible actions need approval"),
            )
    }

    pub fn evaluate(&self, action: &ProposedAction) -> SafetyDecision {
        let mut ordered: Vec<&SafetyRule> = self.rules.iter().collect();
        ordered.sort_by_key(|r| r.priority);

        ordered
            .into_iter()
            .find(|rule| rule.when.matches(action))
            .map(SafetyRule::decision)
            .unwrap_or_else(|| {
                SafetyDecision::deny(
                    DEFAULT_DENY_RULE,
                    format!(
                        "no safety rule matched tool={} capability={} risk={}",
                        action.tool_id, action.capability, action.risk
                    ),
                )
            })
    }
}
