//! Interlock behaviour: default deny, breaker threshold, approvals.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, registry, scripted, service, tool, ScriptedAdapter, Step};
use foreman_core::safety::{BreakerSignal, ProposedAction, CIRCUIT_OPEN_RULE, DEFAULT_DENY_RULE};
use foreman_core::{
    ApprovalMode, ApprovalResponse, BreakerConfig, BreakerState, GoalConstraints, GoalRequest,
    PolicySet, RiskLevel, RunStatus, SafetyInterlock, SafetyVerdict, ToolError,
};

fn action(tool_id: &str, risk: RiskLevel) -> ProposedAction {
    ProposedAction {
        invocation_id: "inv-1".into(),
        tool_id: tool_id.into(),
        capability: "fetch".into(),
        risk,
    }
}

#[test]
fn test_no_matching_rule_denies() {
    let interlock = SafetyInterlock::new(
        Arc::new(PolicySet::empty()),
        BreakerConfig::default(),
        GoalConstraints::default(),
    );
    let evaluation = interlock.evaluate(&action("web-fetch", RiskLevel::Low));
    assert_eq!(evaluation.decision.verdict, SafetyVerdict::Deny);
    assert_eq!(evaluation.decision.rule_id, DEFAULT_DENY_RULE);
}

#[test]
fn test_breaker_opens_after_exact_threshold() {
    let interlock = SafetyInterlock::new(
        Arc::new(PolicySet::standard()),
        BreakerConfig {
            risk_event_threshold: 2,
            consecutive_failure_limit: 3,
            cool_down_ms: 60_000,
        },
        GoalConstraints::default(),
    );

    assert_eq!(interlock.record("shell", BreakerSignal::Harmful, false), None);
    assert_eq!(interlock.breaker_state(), BreakerState::Closed);
    let allowed = interlock.evaluate(&action("shell", RiskLevel::Elevated));
    assert_eq!(allowed.decision.verdict, SafetyVerdict::Allow);

    assert_eq!(
        interlock.record("shell", BreakerSignal::Harmful, false),
        Some(BreakerState::Open)
    );
    let blocked = interlock.evaluate(&action("shell", RiskLevel::Elevated));
    assert_eq!(blocked.decision.verdict, SafetyVerdict::Deny);
    assert_eq!(blocked.decision.rule_id, CIRCUIT_OPEN_RULE);

    // low risk stays available while open
    let low = interlock.evaluate(&action("web-fetch", RiskLevel::Low));
    assert_eq!(low.decision.verdict, SafetyVerdict::Allow);
}

#[test]
fn test_consecutive_permanent_failures_count_as_one_risk_event() {
    let interlock = SafetyInterlock::new(
        Arc::new(PolicySet::standard()),
        BreakerConfig {
            risk_event_threshold: 1,
            consecutive_failure_limit: 3,
            cool_down_ms: 60_000,
        },
        GoalConstraints::default(),
    );
    interlock.record("db", BreakerSignal::Permanent, false);
    interlock.record("db", BreakerSignal::Permanent, false);
    assert_eq!(interlock.breaker_state(), BreakerState::Closed);
    interlock.record("db", BreakerSignal::Permanent, false);
    assert_eq!(interlock.breaker_state(), BreakerState::Open);
}

#[test]
fn test_goal_allowlist_checked_before_policy() {
    let constraints = GoalConstraints {
        allowed_tools: Some(BTreeSet::from(["web-fetch".to_string()])),
        ..GoalConstraints::default()
    };
    let interlock = SafetyInterlock::new(
        Arc::new(PolicySet::standard()),
        BreakerConfig::default(),
        constraints,
    );
    let denied = interlock.evaluate(&action("mirror-fetch", RiskLevel::Low));
    assert_eq!(denied.decision.rule_id, "goal-allowlist");
    let allowed = interlock.evaluate(&action("web-fetch", RiskLevel::Low));
    assert_eq!(allowed.decision.verdict, SafetyVerdict::Allow);
}

#[tokio::test]
async fn test_empty_policy_fails_run_closed() {
    let fetch = ScriptedAdapter::ok();
    let reg = registry(vec![(tool("web-fetch", "fetch", RiskLevel::Low), scripted(&fetch))]);
    let mut config = fast_config();
    config.safety.rules.clear();
    let (svc, _store) = service(config, reg);

    let run_id = svc.submit(GoalRequest::new("fetch the page")).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(fetch.calls(), 0);
    assert_eq!(report.denials[0].rule_id, DEFAULT_DENY_RULE);
    assert_eq!(
        report.failure.and_then(|f| f.rule_id).as_deref(),
        Some(DEFAULT_DENY_RULE)
    );
}

#[tokio::test]
async fn test_harmful_result_trips_breaker_for_the_run() {
    let shell = ScriptedAdapter::always(Step::Fail(ToolError::Harmful("deleted /tmp".into())));
    let reg = registry(vec![(tool("shell", "execute", RiskLevel::Elevated), scripted(&shell))]);
    let (svc, _store) = service(fast_config(), reg);

    let run_id = svc.submit(GoalRequest::new("execute the migration")).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.breaker, BreakerState::Open);
    assert_eq!(shell.calls(), 1, "the open breaker blocks every later attempt");
    assert!(report
        .denials
        .iter()
        .all(|d| d.rule_id == CIRCUIT_OPEN_RULE));
}

fn mailer_config(mode: ApprovalMode) -> foreman_core::ForemanConfig {
    let mut config = fast_config();
    config.safety.approval_mode = mode;
    config
}

fn irreversible_goal() -> GoalRequest {
    GoalRequest::new("send an email to the team").with_constraints(GoalConstraints {
        safety_tier: RiskLevel::Irreversible,
        ..GoalConstraints::default()
    })
}

#[tokio::test]
async fn test_confirm_waits_for_manual_approval() {
    let mailer = ScriptedAdapter::ok();
    let reg = registry(vec![(
        tool("mailer", "send-email", RiskLevel::Irreversible),
        scripted(&mailer),
    )]);
    let (svc, _store) = service(mailer_config(ApprovalMode::Manual), reg);

    let run_id = svc.submit(irreversible_goal()).unwrap();
    let pending = loop {
        let pending = svc.pending_approvals(&run_id).unwrap();
        if !pending.is_empty() {
            break pending;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(pending[0].tool_id, "mailer");
    assert_eq!(pending[0].rule_id, "confirm-irreversible");
    assert_eq!(mailer.calls(), 0);
    assert_eq!(svc.status(&run_id).unwrap().pending_approvals.len(), 1);

    svc.approve(ApprovalResponse {
        run_id: run_id.clone(),
        invocation_id: pending[0].invocation_id.clone(),
        approved: true,
    })
    .unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(mailer.calls(), 1);
    assert!(report.pending_approvals.is_empty());
}

#[tokio::test]
async fn test_declined_confirmation_is_a_denial() {
    let mailer = ScriptedAdapter::ok();
    let reg = registry(vec![(
        tool("mailer", "send-email", RiskLevel::Irreversible),
        scripted(&mailer),
    )]);
    let (svc, _store) = service(mailer_config(ApprovalMode::AutoDeny), reg);

    let run_id = svc.submit(irreversible_goal()).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(mailer.calls(), 0);
    assert_eq!(
        report.failure.and_then(|f| f.rule_id).as_deref(),
        Some("confirm-irreversible")
    );
}

#[tokio::test]
async fn test_approving_unknown_invocation_errors() {
    let (svc, _store) = service(fast_config(), registry(vec![]));
    let err = svc
        .approve(ApprovalResponse {
            run_id: foreman_core::RunId::new(),
            invocation_id: "nope".into(),
            approved: true,
        })
        .unwrap_err();
    assert!(err.to_string().contains("unknown run"));
}
