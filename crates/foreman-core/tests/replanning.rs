//! Corrective replanning through the public planner API.

mod common;

use std::sync::Arc;

use common::{registry, tool};
use foreman_core::{
    Feedback, FailureKind, Goal, GoalRequest, NodeState, Planner, PlannerConfig, ReplanOutcome,
    RiskLevel, TaskForest, ToolHandler,
};

fn planner() -> Planner {
    let reg = registry(vec![
        (tool("a-fetch", "fetch", RiskLevel::Low), ToolHandler::Echo),
        (tool("b-fetch", "fetch", RiskLevel::Low), ToolHandler::Echo),
        (tool("summarizer", "summarize", RiskLevel::Low), ToolHandler::Echo),
    ]);
    Planner::new(Arc::new(reg), PlannerConfig::default())
}

fn goal() -> Goal {
    Goal::accept(GoalRequest::new("fetch the page, then summarize it")).unwrap()
}

fn plan(planner: &Planner) -> TaskForest {
    planner.decompose(&goal()).unwrap()
}

fn tool_failure(tool_id: &str) -> Feedback {
    Feedback {
        criterion: "tool-succeeded".into(),
        detail: format!("{tool_id}: 404"),
        recoverable: true,
        blamed_tools: vec![tool_id.to_string()],
        failure: Some(FailureKind::ToolFailed),
        rule_id: None,
    }
}

#[test]
fn test_corrective_takes_over_downstream_edges() {
    let planner = planner();
    let mut forest = plan(&planner);
    let leaves: Vec<_> = forest.leaves().map(|l| l.id).collect();
    let (fetch, summarize) = (leaves[0], leaves[1]);
    forest.transition(fetch, NodeState::Ready).unwrap();
    forest.transition(fetch, NodeState::Running).unwrap();
    forest.transition(fetch, NodeState::Failed).unwrap();

    let outcome = planner.replan(&mut forest, fetch, &tool_failure("a-fetch")).unwrap();
    let ReplanOutcome::Corrective(corrective) = outcome else {
        panic!("expected a corrective, got {outcome:?}");
    };

    let node = forest.node(corrective).unwrap();
    assert_eq!(node.capability.as_deref(), Some("fetch"));
    assert_eq!(node.corrective_of, Some(fetch));
    assert!(node.excluded_tools.contains("a-fetch"));
    assert_eq!(forest.node(summarize).unwrap().depends_on, vec![corrective]);
    assert_eq!(forest.node(fetch).unwrap().superseded_by, Some(corrective));
    forest.validate().unwrap();
}

#[test]
fn test_same_input_same_forest() {
    let (p1, p2) = (planner(), planner());
    let goal = goal();
    let mut f1 = p1.decompose(&goal).unwrap();
    let mut f2 = p2.decompose(&goal).unwrap();
    let fetch = f1.leaves().next().unwrap().id;

    let o1 = p1.replan(&mut f1, fetch, &tool_failure("a-fetch")).unwrap();
    let o2 = p2.replan(&mut f2, fetch, &tool_failure("a-fetch")).unwrap();
    assert_eq!(o1, o2);
    assert_eq!(
        serde_json::to_value(&f1).unwrap(),
        serde_json::to_value(&f2).unwrap()
    );

    // Replaying the same request is a no-op.
    let before = f1.clone();
    let again = p1.replan(&mut f1, fetch, &tool_failure("a-fetch")).unwrap();
    assert_eq!(again, o1);
    assert_eq!(f1, before);
}

#[test]
fn test_gives_up_when_every_tool_is_excluded() {
    let planner = planner();
    let mut forest = plan(&planner);
    let fetch = forest.leaves().next().unwrap().id;

    let Ok(ReplanOutcome::Corrective(second)) =
        planner.replan(&mut forest, fetch, &tool_failure("a-fetch"))
    else {
        panic!("first replan should find b-fetch");
    };
    let outcome = planner
        .replan(&mut forest, second, &tool_failure("b-fetch"))
        .unwrap();
    assert!(matches!(outcome, ReplanOutcome::BranchFailed { reason } if reason.contains("no alternative")));
}
