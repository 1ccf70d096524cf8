//! Safety interlock: decides whether a proposed tool invocation may proceed.
//!
//! Evaluation order for every proposed action:
//! 1. goal constraints (tool allowlist, then safety tier)
//! 2. circuit breaker (open blocks everything above low risk)
//! 3. policy rules by priority, first match wins
//! 4. no match: deny (`default-deny`)

pub mod breaker;
pub mod interlock;
pub mod policy;
pub mod request;

pub use breaker::{Admission, BreakerConfig, BreakerSignal, BreakerState, CircuitBreaker};
pub use interlock::{Evaluation, SafetyInterlock};
pub use policy::{PolicySet, RuleMatch, SafetyRule};
pub use request::{ProposedAction, SafetyDecision, SafetyVerdict};

/// Rule id reported when nothing matched.
pub const DEFAULT_DENY_RULE: &str = "default-deny";
/// Rule id reported when the goal's tool allowlist excludes the tool.
pub const GOAL_ALLOWLIST_RULE: &str = "goal-allowlist";
/// Rule id reported when the tool's risk exceeds the goal's safety tier.
pub const GOAL_TIER_RULE: &str = "goal-safety-tier";
/// Rule id reported while the circuit breaker blocks the action.
pub const CIRCUIT_OPEN_RULE: &str = "circuit-open";
