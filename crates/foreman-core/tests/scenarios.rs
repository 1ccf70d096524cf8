//! End-to-end runs through `ForemanService`.

mod common;

use std::time::Duration;

use common::{fast_config, registry, scripted, service, tool, ScriptedAdapter, Step};
use foreman_core::{
    ApprovalMode, AuditEvent, FailureKind, GoalConstraints, GoalRequest, InvocationResult, NodeState, RiskLevel,
    RunStatus, ToolError, ToolHandler,
};
use foreman_state::RunStore;

#[tokio::test]
async fn test_fetch_and_summarize_completes() {
    let reg = registry(vec![
        (tool("web-fetch", "fetch", RiskLevel::Low), ToolHandler::Echo),
        (tool("summarizer", "summarize", RiskLevel::Low), ToolHandler::Echo),
    ]);
    let (svc, store) = service(fast_config(), reg);

    let run_id = svc.submit(GoalRequest::new("fetch URL X and summarize")).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.counts.leaves, 2);
    assert_eq!(report.counts.succeeded, 2);
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.outcomes.iter().all(|o| o.success));
    assert!(report.denials.is_empty());
    assert!(report.failure.is_none());
    assert_eq!(svc.contexts().live_count(), 0);

    let record = store.get_run(&run_id).await.unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert!(record.forest_digest.is_some());
    let audit = store.get_audit(&run_id).await.unwrap();
    assert_eq!(audit.len(), svc.audit(&run_id).unwrap().len());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_times_out_twice_then_succeeds() {
    let fetch = ScriptedAdapter::new([
        Step::Sleep(Duration::from_secs(5)),
        Step::Sleep(Duration::from_secs(5)),
    ]);
    let reg = registry(vec![(tool("web-fetch", "fetch", RiskLevel::Low), scripted(&fetch))]);
    let mut config = fast_config();
    config.gateway.invocation_timeout_ms = 1_000;
    let (svc, _store) = service(config, reg);

    let run_id = svc.submit(GoalRequest::new("fetch the quarterly report")).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let attempts: Vec<_> = report
        .attempted
        .iter()
        .filter(|r| r.tool_id == "web-fetch")
        .collect();
    assert_eq!(attempts.len(), 3);
    assert!(matches!(attempts[0].result, InvocationResult::Transient { .. }));
    assert!(matches!(attempts[1].result, InvocationResult::Transient { .. }));
    assert_eq!(attempts[2].result, InvocationResult::Succeeded);
    assert_eq!(fetch.calls(), 3);
}

#[tokio::test]
async fn test_irreversible_tool_denied_by_goal_tier() {
    let mailer = ScriptedAdapter::ok();
    let reg = registry(vec![(
        tool("mailer", "send-email", RiskLevel::Irreversible).with_keywords(["email"]),
        scripted(&mailer),
    )]);
    let (svc, _store) = service(fast_config(), reg);

    let run_id = svc.submit(GoalRequest::new("send an email to the team")).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(mailer.calls(), 0, "a denied tool must never run");
    assert!(report.attempted.is_empty());

    assert_eq!(report.denials.len(), 1);
    assert_eq!(report.denials[0].rule_id, "goal-safety-tier");

    let failure = report.failure.expect("failed run carries a failure");
    assert_eq!(failure.kind, FailureKind::PlanningExhausted);
    assert_eq!(failure.cause, Some(FailureKind::SafetyDenied));
    assert_eq!(failure.rule_id.as_deref(), Some("goal-safety-tier"));

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.failure_kind(), Some(FailureKind::SafetyDenied));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_with_three_executors_in_flight() {
    let fetch = ScriptedAdapter::always(Step::Sleep(Duration::from_secs(3_600)));
    let mut descriptor = tool("web-fetch", "fetch", RiskLevel::Low);
    descriptor.max_concurrency = 3;
    let reg = registry(vec![(descriptor, scripted(&fetch))]);
    let (svc, _store) = service(fast_config(), reg);

    let run_id = svc
        .submit(GoalRequest::new("fetch a and fetch b and fetch c"))
        .unwrap();
    let mut rx = svc.subscribe(&run_id).unwrap();
    rx.wait_for(|r| r.counts.running == 3).await.unwrap();
    while fetch.calls() < 3 {
        tokio::task::yield_now().await;
    }
    assert_eq!(svc.contexts().live_count(), 3);

    let cancelled_at = tokio::time::Instant::now();
    svc.cancel(&run_id).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(cancelled_at.elapsed() < Duration::from_secs(5));
    assert_eq!(svc.contexts().live_count(), 0);
    assert_eq!(svc.contexts().acquired_total(), 3);
    assert_eq!(svc.contexts().released_total(), 3);
    assert!(report
        .forest
        .unwrap()
        .leaves()
        .all(|l| l.state == NodeState::Failed));
}

#[tokio::test]
async fn test_failed_tool_replaced_by_alternative() {
    let broken = ScriptedAdapter::always(Step::Fail(ToolError::Permanent("404".into())));
    let mirror = ScriptedAdapter::ok();
    let reg = registry(vec![
        (tool("a-fetch", "fetch", RiskLevel::Low), scripted(&broken)),
        (tool("b-fetch", "fetch", RiskLevel::Low), scripted(&mirror)),
    ]);
    let mut config = fast_config();
    // one invocation per attempt, so the first attempt only tries a-fetch
    config.executor.max_retries = 1;
    config.orchestrator.max_retries = 1;
    let (svc, _store) = service(config, reg);

    let run_id = svc.submit(GoalRequest::new("fetch the page")).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(broken.calls(), 1);
    assert_eq!(mirror.calls(), 1);

    let forest = report.forest.unwrap();
    let corrective = forest
        .leaves()
        .find(|l| l.corrective_of.is_some())
        .expect("a corrective node was inserted");
    assert!(corrective.excluded_tools.contains("a-fetch"));
    assert_eq!(corrective.state, NodeState::Succeeded);

    let replans = svc
        .audit(&run_id)
        .unwrap()
        .into_iter()
        .filter(|e| matches!(e.event, AuditEvent::Replanned { corrective: Some(_), .. }))
        .count();
    assert_eq!(replans, 1);
}

#[tokio::test]
async fn test_sequential_steps_pass_upstream_payloads() {
    let summarize = ScriptedAdapter::ok();
    let reg = registry(vec![
        (
            tool("web-fetch", "fetch", RiskLevel::Low),
            ToolHandler::Fixed(serde_json::json!({"body": "<html>"})),
        ),
        (tool("summarizer", "summarize", RiskLevel::Low), scripted(&summarize)),
    ]);
    let (svc, _store) = service(fast_config(), reg);

    let run_id = svc
        .submit(GoalRequest::new("fetch the page, then summarize it"))
        .unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let order: Vec<&str> = report.attempted.iter().map(|r| r.tool_id.as_str()).collect();
    assert_eq!(order, vec!["web-fetch", "summarizer"]);
}

#[tokio::test]
async fn test_unrecognised_goal_fails_planning() {
    let reg = registry(vec![(tool("web-fetch", "fetch", RiskLevel::Low), ToolHandler::Echo)]);
    let (svc, _store) = service(fast_config(), reg);

    let run_id = svc.submit(GoalRequest::new("contemplate the void")).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.forest.is_none());
    assert_eq!(
        report.failure.map(|f| f.kind),
        Some(FailureKind::PlanningExhausted)
    );
}

#[tokio::test]
async fn test_blank_goal_rejected_at_submit() {
    let (svc, _store) = service(fast_config(), registry(vec![]));
    assert!(svc.submit(GoalRequest::new("   ")).is_err());
}

#[tokio::test]
async fn test_non_ascii_goal_runs_to_completion() {
    let reg = registry(vec![
        (tool("web-fetch", "fetch", RiskLevel::Low), ToolHandler::Echo),
        (tool("summarizer", "summarize", RiskLevel::Low), ToolHandler::Echo),
    ]);
    let (svc, _store) = service(fast_config(), reg);

    let run_id = svc
        .submit(GoalRequest::new("fetch the café menu, then summarize it"))
        .unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.counts.leaves, 2);
}

#[tokio::test]
async fn test_outer_requirement_of_a_group_is_executed() {
    let fetch = ScriptedAdapter::ok();
    let summarize = ScriptedAdapter::ok();
    let reg = registry(vec![
        (tool("web-fetch", "fetch", RiskLevel::Low), scripted(&fetch)),
        (tool("summarizer", "summarize", RiskLevel::Low), scripted(&summarize)),
    ]);
    let (svc, _store) = service(fast_config(), reg);

    let run_id = svc
        .submit(GoalRequest::new("fetch the report (summarize it)"))
        .unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let order: Vec<&str> = report.attempted.iter().map(|r| r.tool_id.as_str()).collect();
    assert_eq!(order, vec!["web-fetch", "summarizer"]);
    assert_eq!((fetch.calls(), summarize.calls()), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_already_passed_fails_before_dispatch() {
    let fetch = ScriptedAdapter::ok();
    let reg = registry(vec![(tool("web-fetch", "fetch", RiskLevel::Low), scripted(&fetch))]);
    let (svc, _store) = service(fast_config(), reg);

    let constraints = GoalConstraints {
        deadline: Some(chrono::Utc::now() - chrono::Duration::seconds(1)),
        ..GoalConstraints::default()
    };
    let run_id = svc
        .submit(GoalRequest::new("fetch the page").with_constraints(constraints))
        .unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failure.unwrap().kind, FailureKind::DeadlineExceeded);
    assert_eq!(fetch.calls(), 0);
}

// Real time: the deadline is a wall-clock instant.
#[tokio::test]
async fn test_deadline_passing_mid_run_fails_the_run() {
    let fetch = ScriptedAdapter::always(Step::Sleep(Duration::from_secs(3_600)));
    let reg = registry(vec![(tool("web-fetch", "fetch", RiskLevel::Low), scripted(&fetch))]);
    let (svc, _store) = service(fast_config(), reg);

    let constraints = GoalConstraints {
        deadline: Some(chrono::Utc::now() + chrono::Duration::milliseconds(200)),
        ..GoalConstraints::default()
    };
    let run_id = svc
        .submit(GoalRequest::new("fetch the page").with_constraints(constraints))
        .unwrap();
    let report = tokio::time::timeout(Duration::from_secs(10), svc.wait(&run_id))
        .await
        .expect("run ends soon after its deadline")
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failure.unwrap().kind, FailureKind::DeadlineExceeded);
    assert!(fetch.calls() >= 1);
    assert_eq!(svc.contexts().live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_needs_retry_requeues_the_same_node() {
    let fetch = ScriptedAdapter::new([
        Step::Fail(ToolError::Transient("503".into())),
        Step::Fail(ToolError::Transient("503".into())),
    ]);
    let reg = registry(vec![(tool("web-fetch", "fetch", RiskLevel::Low), scripted(&fetch))]);
    let mut config = fast_config();
    // a single invocation per attempt, so each transient failure reaches the verifier
    config.executor.max_retries = 1;
    config.orchestrator.max_retries = 3;
    let (svc, _store) = service(config, reg);

    let run_id = svc.submit(GoalRequest::new("fetch the page")).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(fetch.calls(), 3);
    let forest = report.forest.unwrap();
    assert_eq!(forest.leaves().count(), 1, "requeue must not replan");
    let leaf = forest.leaves().next().unwrap();
    assert_eq!(leaf.retries, 2);
    assert_eq!(leaf.state, NodeState::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_dependent_of_failed_prerequisite_never_runs() {
    let fetch = ScriptedAdapter::ok();
    let summarize = ScriptedAdapter::ok();
    let reg = registry(vec![
        // above the default goal tier, so fetch is denied without recourse
        (tool("web-fetch", "fetch", RiskLevel::Irreversible), scripted(&fetch)),
        (tool("summarizer", "summarize", RiskLevel::Low), scripted(&summarize)),
    ]);
    let (svc, _store) = service(fast_config(), reg);

    let run_id = svc
        .submit(GoalRequest::new("fetch the page, then summarize it"))
        .unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!((fetch.calls(), summarize.calls()), (0, 0));
    assert!(report.attempted.is_empty());
    let forest = report.forest.unwrap();
    let leaf = forest
        .leaves()
        .find(|l| l.capability.as_deref() == Some("summarize"))
        .unwrap();
    assert_ne!(leaf.state, NodeState::Succeeded);
    assert!(report.outcomes.iter().all(|o| o.node_id != leaf.id));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_approval() {
    let mailer = ScriptedAdapter::ok();
    let reg = registry(vec![(
        tool("mailer", "send-email", RiskLevel::Irreversible),
        scripted(&mailer),
    )]);
    let mut config = fast_config();
    config.safety.approval_mode = ApprovalMode::Manual;
    let (svc, _store) = service(config, reg);

    let goal = GoalRequest::new("send an email to the team").with_constraints(GoalConstraints {
        safety_tier: RiskLevel::Irreversible,
        ..GoalConstraints::default()
    });
    let run_id = svc.submit(goal).unwrap();
    while svc.pending_approvals(&run_id).unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    svc.cancel(&run_id).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(mailer.calls(), 0);
    assert!(report.pending_approvals.is_empty());
    assert!(svc.pending_approvals(&run_id).unwrap().is_empty());
    assert_eq!(svc.contexts().live_count(), 0);
}

#[tokio::test]
async fn test_finished_runs_are_evicted_beyond_retention() {
    let reg = registry(vec![(tool("web-fetch", "fetch", RiskLevel::Low), ToolHandler::Echo)]);
    let mut config = fast_config();
    config.orchestrator.retained_runs = 2;
    let (svc, store) = service(config, reg);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let run_id = svc.submit(GoalRequest::new("fetch the page")).unwrap();
        svc.wait(&run_id).await.unwrap();
        ids.push(run_id);
    }
    assert_eq!(svc.runs().len(), 3, "eviction happens on the next submission");

    let latest = svc.submit(GoalRequest::new("fetch the page")).unwrap();
    svc.wait(&latest).await.unwrap();

    let held = svc.runs();
    assert_eq!(held.len(), 3);
    assert!(!held.contains(&ids[0]));
    assert!(held.contains(&latest));
    assert!(matches!(
        svc.status(&ids[0]),
        Err(foreman_core::ForemanError::UnknownRun { .. })
    ));

    let record = svc.record(&ids[0]).await.unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert!(!store.get_audit(&ids[0]).await.unwrap().is_empty());
}
