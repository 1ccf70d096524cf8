//! The per-run safety interlock.

use std::sync::Arc;

use crate::domain::GoalConstraints;
use crate::metrics::METRICS;

use super::breaker::{Admission, BreakerConfig, BreakerSignal, BreakerState, CircuitBreaker};
use super::policy::PolicySet;
use super::request::{ProposedAction, SafetyDecision, SafetyVerdict};
use super::{CIRCUIT_OPEN_RULE, GOAL_ALLOWLIST_RULE, GOAL_TIER_RULE};

/// A decision plus whether the action holds the breaker's half-open probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: SafetyDecision,
    pub probe: bool,
}

/// Safety gate for one run: goal constraints, breaker, shared policy.
///
/// The policy set is shared across runs; the breaker belongs to this run
/// alone, so one run's risk events never block another.
#[derive(Debug)]
pub struct SafetyInterlock {
    policy: Arc<PolicySet>,
    breaker: CircuitBreaker,
    constraints: GoalConstraints,
}

impl SafetyInterlock {
    pub fn new(policy: Arc<PolicySet>, breaker: BreakerConfig, constraints: GoalConstraints) -> Self {
        Self {
            policy,
            breaker: CircuitBreaker::new(breaker),
            constraints,
        }
    }

    pub fn evaluate(&self, action: &ProposedAction) -> Evaluation {
        let evaluation = self.evaluate_inner(action);
        if evaluation.decision.verdict == SafetyVerdict::Deny {
            METRICS.inc_safety_denials();
        }
        evaluation
    }

    fn evaluate_inner(&self, action: &ProposedAction) -> Evaluation {
        let deny = |rule_id: &str, reason: String| Evaluation {
            decision: SafetyDecision::deny(rule_id, reason),
            probe: false,
        };

        if !self.constraints.permits_tool(&action.tool_id) {
            return deny(
                GOAL_ALLOWLIST_RULE,
                format!("tool {} is not in the goal's allowlist", action.tool_id),
            );
        }
        if !self.constraints.permits_risk(action.risk) {
            return deny(
                GOAL_TIER_RULE,
                format!(
                    "tool {} is {} risk, goal permits at most {}",
                    action.tool_id, action.risk, self.constraints.safety_tier
                ),
            );
        }

        let probe = match self.breaker.admit(action.risk) {
            Admission::Blocked => {
                return deny(
                    CIRCUIT_OPEN_RULE,
                    format!(
                        "circuit breaker is {:?}; {} risk actions are blocked",
                        self.breaker.state(),
                        action.risk
                    ),
                );
            }
            Admission::Probe => true,
            Admission::Allowed => false,
        };

        let decision = self.policy.evaluate(action);
        if probe && decision.verdict == SafetyVerdict::Deny {
            self.breaker.release_probe();
            return Evaluation {
                decision,
                probe: false,
            };
        }
        Evaluation { decision, probe }
    }

    /// Feed a tool result back into the breaker.
    pub fn record(&self, tool_id: &str, signal: BreakerSignal, probe: bool) -> Option<BreakerState> {
        self.breaker.record(tool_id, signal, probe)
    }

    /// Return an unused probe slot (approval declined, cancelled before run).
    pub fn release_probe(&self) {
        self.breaker.release_probe();
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn constraints(&self) -> &GoalConstraints {
        &self.constraints
    }
}
