//! Planner: goal text to task forest, and corrective replanning.
//!
//! Decomposition is lexical. The description is split into sequential steps
//! (`;`, `.`, `,`, `then`), each step into parallel parts (`and`), and each
//! part is matched against a lexicon built from the registry's capability
//! tags. A parenthesised group becomes a composite sub-goal decomposed
//! recursively.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::tool::{specificity, tag_matches};
use crate::domain::{Criterion, Feedback, ForestError, Goal, NodeId, TaskForest};
use crate::registry::ToolRegistry;

/// Step separators, checked at parenthesis depth 0. Longest first.
const SEQUENTIAL: &[&str] = &[" and then ", " then ", "; ", ". ", ", ", ";", ","];
const PARALLEL: &[&str] = &[" and "];
/// Connectives left at the start of a fragment after splitting.
const LEADING_CONNECTIVES: &[&str] = &["and then ", "then ", "and ", "also "];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Deepest node allowed below the root.
    pub max_depth: usize,
    /// Corrective insertions allowed along one node's lineage.
    pub max_replans: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            max_replans: 2,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("goal description is empty")]
    EmptyGoal,

    #[error("no capability requirement recognised in '{text}'")]
    NoCapability { text: String },

    #[error("goal nesting exceeds max depth {max_depth}")]
    DepthExceeded { max_depth: usize },

    #[error("unbalanced parentheses in '{text}'")]
    UnbalancedParentheses { text: String },

    #[error("node {0} is not a leaf")]
    NotALeaf(NodeId),

    #[error("node {0} was already replaced using different feedback")]
    AlreadySuperseded(NodeId),

    #[error(transparent)]
    Forest(#[from] ForestError),
}

/// Result of replanning a failed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplanOutcome {
    /// A corrective sibling now stands in for the failed node.
    Corrective(NodeId),
    /// Nothing else to try; the failed node stays failed.
    BranchFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PlanItem {
    Leaf {
        capability: String,
        clause: String,
    },
    Group {
        clause: String,
        steps: Vec<Vec<PlanItem>>,
    },
}

#[derive(Debug)]
pub struct Planner {
    registry: Arc<ToolRegistry>,
    lexicon: BTreeMap<String, BTreeSet<String>>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(registry: Arc<ToolRegistry>, config: PlannerConfig) -> Self {
        let lexicon = registry.lexicon();
        Self {
            registry,
            lexicon,
            config,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Build the task forest for a goal.
    pub fn decompose(&self, goal: &Goal) -> Result<TaskForest, PlanningError> {
        let text = goal.description.trim().to_lowercase();
        if text.is_empty() {
            return Err(PlanningError::EmptyGoal);
        }

        let steps = self.plan_text(&text, 0)?;
        let mut forest = TaskForest::new(goal.id.clone(), goal.description.clone());
        let root = forest.root;
        self.attach(&mut forest, goal, root, &steps, &[])?;

        if forest.leaves().next().is_none() {
            return Err(PlanningError::NoCapability { text });
        }
        forest.validate()?;
        info!(
            goal_id = %goal.id,
            leaves = forest.leaves().count(),
            nodes = forest.len(),
            "goal decomposed"
        );
        Ok(forest)
    }

    fn plan_text(&self, text: &str, parent_depth: usize) -> Result<Vec<Vec<PlanItem>>, PlanningError> {
        if parent_depth + 1 > self.config.max_depth {
            return Err(PlanningError::DepthExceeded {
                max_depth: self.config.max_depth,
            });
        }

        let text = text.trim().trim_end_matches('.');
        let mut steps = Vec::new();
        for step in split_top_level(text, SEQUENTIAL)? {
            let mut items = Vec::new();
            for part in split_top_level(strip_connectives(&step), PARALLEL)? {
                let part = strip_connectives(&part);
                if part.is_empty() {
                    continue;
                }
                items.extend(self.plan_part(part, parent_depth)?);
            }
            if !items.is_empty() {
                steps.push(items);
            }
        }
        Ok(steps)
    }

    fn plan_part(&self, part: &str, parent_depth: usize) -> Result<Vec<PlanItem>, PlanningError> {
        if !part.contains('(') {
            return Ok(self.extract(part));
        }

        // Text outside the groups labels the composite and runs before the
        // groups; each group is its own sub-goal.
        let mut label = String::new();
        let mut groups: Vec<&str> = Vec::new();
        let mut rest = part;
        while let Some(open) = rest.find('(') {
            label.push_str(&rest[..open]);
            let close = matching_paren(rest, open).ok_or_else(|| {
                PlanningError::UnbalancedParentheses {
                    text: part.to_string(),
                }
            })?;
            groups.push(&rest[open + 1..close]);
            rest = &rest[close + 1..];
        }
        label.push_str(rest);
        let label = label.split_whitespace().collect::<Vec<_>>().join(" ");

        let mut nested: Vec<(String, Vec<Vec<PlanItem>>)> = Vec::new();
        for group in groups {
            let steps = self.plan_text(group, parent_depth + 1)?;
            if !steps.is_empty() {
                nested.push((group.trim().to_string(), steps));
            }
        }

        let outer = self.extract(&label);
        if nested.is_empty() {
            return Ok(outer);
        }
        if outer.is_empty() {
            return Ok(nested
                .into_iter()
                .map(|(group, steps)| PlanItem::Group {
                    clause: if label.is_empty() { group } else { label.clone() },
                    steps,
                })
                .collect());
        }

        let mut steps = vec![outer];
        if nested.len() == 1 {
            let (_, group_steps) = nested.remove(0);
            steps.extend(group_steps);
        } else {
            steps.push(
                nested
                    .into_iter()
                    .map(|(clause, steps)| PlanItem::Group { clause, steps })
                    .collect(),
            );
        }
        Ok(vec![PlanItem::Group {
            clause: label,
            steps,
        }])
    }

    /// Capability leaves for one part, best candidate decomposition.
    fn extract(&self, part: &str) -> Vec<PlanItem> {
        let mut hits: Vec<(String, Vec<&str>)> = Vec::new();
        for word in words(part) {
            if hits.iter().any(|(w, _)| *w == word) {
                continue;
            }
            let tags: Vec<&str> = self
                .lexicon
                .iter()
                .filter(|(_, triggers)| triggers.iter().any(|t| word_matches(t, &word)))
                .map(|(tag, _)| tag.as_str())
                .collect();
            if !tags.is_empty() {
                hits.push((word, tags));
            }
        }
        if hits.is_empty() {
            return Vec::new();
        }

        // (a) one leaf per hit, most specific tag first
        let mut per_hit: Vec<&str> = Vec::new();
        for (_, tags) in &hits {
            let best = tags
                .iter()
                .copied()
                .max_by(|a, b| specificity(a).cmp(&specificity(b)).then_with(|| b.cmp(a)));
            if let Some(best) = best {
                if !per_hit.contains(&best) {
                    per_hit.push(best);
                }
            }
        }

        // (b) a single tag whose triggers cover every hit
        let mut candidates: Vec<Vec<&str>> = vec![per_hit];
        for (tag, _) in &self.lexicon {
            if hits.iter().all(|(_, tags)| tags.contains(&tag.as_str())) {
                candidates.push(vec![tag.as_str()]);
            }
        }

        let chosen = candidates
            .into_iter()
            .min_by(|a, b| {
                let spec = |c: &Vec<&str>| c.iter().map(|t| specificity(t)).sum::<usize>();
                a.len()
                    .cmp(&b.len())
                    .then_with(|| spec(b).cmp(&spec(a)))
                    .then_with(|| a.join(",").cmp(&b.join(",")))
            })
            .unwrap_or_default();

        debug!(part, capabilities = ?chosen, "capabilities extracted");
        chosen
            .into_iter()
            .map(|capability| PlanItem::Leaf {
                capability: capability.to_string(),
                clause: part.to_string(),
            })
            .collect()
    }

    /// Materialize planned steps under `parent`. Returns the leaves of the
    /// last step, which later siblings depend on.
    fn attach(
        &self,
        forest: &mut TaskForest,
        goal: &Goal,
        parent: NodeId,
        steps: &[Vec<PlanItem>],
        inherited: &[NodeId],
    ) -> Result<Vec<NodeId>, PlanningError> {
        let mut previous: Vec<NodeId> = inherited.to_vec();
        for step in steps {
            let mut current = Vec::new();
            for item in step {
                match item {
                    PlanItem::Leaf { capability, clause } => {
                        let id = forest.add_leaf(
                            parent,
                            capability.clone(),
                            clause.clone(),
                            acceptance_for(goal, capability),
                            previous.clone(),
                        )?;
                        current.push(id);
                    }
                    PlanItem::Group { clause, steps } => {
                        let composite = forest.add_composite(parent, clause.clone(), clause.clone())?;
                        let tail = self.attach(forest, goal, composite, steps, &previous)?;
                        current.extend(tail);
                    }
                }
            }
            previous = current;
        }
        Ok(previous)
    }

    /// Replace a failed leaf with a corrective sibling, or give up on it.
    ///
    /// Deterministic and idempotent: replanning the same node with the same
    /// feedback returns the corrective node created the first time.
    pub fn replan(
        &self,
        forest: &mut TaskForest,
        failed: NodeId,
        feedback: &Feedback,
    ) -> Result<ReplanOutcome, PlanningError> {
        let node = forest
            .node(failed)
            .ok_or(ForestError::UnknownNode(failed))?
            .clone();
        if !node.is_leaf() {
            return Err(PlanningError::NotALeaf(failed));
        }
        if let Some(existing) = node.superseded_by {
            if node.feedback.as_ref() == Some(feedback) {
                return Ok(ReplanOutcome::Corrective(existing));
            }
            return Err(PlanningError::AlreadySuperseded(failed));
        }
        if let Some(n) = forest.node_mut(failed) {
            n.feedback = Some(feedback.clone());
        }

        if !feedback.recoverable {
            return Ok(ReplanOutcome::BranchFailed {
                reason: format!("non-recoverable failure: {}", feedback.detail),
            });
        }
        if node.replan_depth >= self.config.max_replans {
            return Ok(ReplanOutcome::BranchFailed {
                reason: format!(
                    "replan budget of {} exhausted: {}",
                    self.config.max_replans, feedback.detail
                ),
            });
        }

        let capability = node.capability.clone().unwrap_or_default();
        let mut excluded = node.excluded_tools.clone();
        excluded.extend(feedback.blamed_tools.iter().cloned());
        let alternatives = self
            .registry
            .candidates(&capability)
            .into_iter()
            .filter(|(d, _)| !excluded.contains(&d.id))
            .count();
        if alternatives == 0 {
            return Ok(ReplanOutcome::BranchFailed {
                reason: format!(
                    "no alternative tool for '{capability}': {}",
                    feedback.detail
                ),
            });
        }

        let corrective = forest.insert_corrective(failed, excluded, feedback.clone())?;
        forest.validate()?;
        info!(
            failed = %failed,
            corrective = %corrective,
            capability = %capability,
            "corrective sub-task inserted"
        );
        Ok(ReplanOutcome::Corrective(corrective))
    }
}

/// Acceptance criteria for a leaf, from the goal's constraints.
fn acceptance_for(goal: &Goal, capability: &str) -> Vec<Criterion> {
    let mut criteria = vec![Criterion::ToolSucceeded, Criterion::NonEmptyPayload];
    let fields: Vec<String> = goal
        .constraints
        .expected_fields
        .iter()
        .filter(|(tag, _)| tag_matches(tag, capability))
        .flat_map(|(_, fields)| fields.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if !fields.is_empty() {
        criteria.push(Criterion::FieldsPresent { fields });
    }
    if let Some(deadline) = goal.constraints.deadline {
        criteria.push(Criterion::BeforeDeadline { deadline });
    }
    criteria
}

fn words(text: &str) -> Vec<String> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let re = WORD.get_or_init(|| Regex::new(r"[a-z][a-z0-9]*").unwrap_or_else(|_| unreachable!()));
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// A trigger matches the word itself and its common inflections.
fn word_matches(trigger: &str, word: &str) -> bool {
    if word == trigger {
        return true;
    }
    if let Some(rest) = word.strip_prefix(trigger) {
        return matches!(rest, "s" | "es" | "ed" | "d" | "ing");
    }
    // summarize -> summarizing
    trigger
        .strip_suffix('e')
        .and_then(|stem| word.strip_prefix(stem))
        .is_some_and(|rest| rest == "ing")
}

fn strip_connectives(text: &str) -> &str {
    let mut text = text.trim();
    loop {
        let before = text;
        for connective in LEADING_CONNECTIVES {
            if let Some(rest) = text.strip_prefix(connective) {
                text = rest.trim_start();
            }
        }
        if text == before {
            return text;
        }
    }
}

/// Split on any separator appearing outside parentheses.
fn split_top_level(text: &str, separators: &[&str]) -> Result<Vec<String>, PlanningError> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut i = 0usize;
    let bytes = text.as_bytes();
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(PlanningError::UnbalancedParentheses {
                        text: text.to_string(),
                    });
                }
            }
            _ if depth == 0 && text.is_char_boundary(i) => {
                if let Some(sep) = separators.iter().find(|s| text[i..].starts_with(**s)) {
                    out.push(text[start..i].to_string());
                    i += sep.len();
                    start = i;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    if depth != 0 {
        return Err(PlanningError::UnbalancedParentheses {
            text: text.to_string(),
        });
    }
    out.push(text[start..].to_string());
    Ok(out
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, b) in text.bytes().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureKind, GoalConstraints, GoalRequest, NodeKind, NodeState, RiskLevel, ToolDescriptor};
    use crate::tools::ToolHandler;

    fn registry() -> Arc<ToolRegistry> {
        let reg = ToolRegistry::new()
            .with_tool(
                ToolDescriptor::new("web-fetch", "fetch", RiskLevel::Low).with_keywords(["download"]),
                ToolHandler::Echo,
            )
            .unwrap()
            .with_tool(
                ToolDescriptor::new("mirror-fetch", "fetch", RiskLevel::Low),
                ToolHandler::Echo,
            )
            .unwrap()
            .with_tool(
                ToolDescriptor::new("summarizer", "summarize", RiskLevel::Low),
                ToolHandler::Echo,
            )
            .unwrap()
            .with_tool(
                ToolDescriptor::new("mailer", "send-email", RiskLevel::Irreversible)
                    .with_keywords(["email"]),
                ToolHandler::Echo,
            )
            .unwrap();
        Arc::new(reg)
    }

    fn planner() -> Planner {
        Planner::new(registry(), PlannerConfig::default())
    }

    fn goal(text: &str) -> Goal {
        Goal::accept(GoalRequest::new(text)).unwrap()
    }

    fn capabilities(forest: &TaskForest) -> Vec<String> {
        forest
            .leaves()
            .map(|l| l.capability.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_parallel_parts_have_no_dependencies() {
        let forest = planner().decompose(&goal("Fetch URL X and summarize")).unwrap();
        assert_eq!(capabilities(&forest), vec!["fetch", "summarize"]);
        assert!(forest.leaves().all(|l| l.depends_on.is_empty()));
    }

    #[test]
    fn test_sequential_steps_chain() {
        let forest = planner()
            .decompose(&goal("download the report, then summarize it and then email the team"))
            .unwrap();
        let leaves: Vec<_> = forest.leaves().collect();
        assert_eq!(capabilities(&forest), vec!["fetch", "summarize", "send-email"]);
        assert!(leaves[0].depends_on.is_empty());
        assert_eq!(leaves[1].depends_on, vec![leaves[0].id]);
        assert_eq!(leaves[2].depends_on, vec![leaves[1].id]);
    }

    #[test]
    fn test_covering_tag_preferred_over_many_leaves() {
        // "send" and "email" both trigger send-email; one leaf beats two
        let forest = planner().decompose(&goal("send an email")).unwrap();
        assert_eq!(capabilities(&forest), vec!["send-email"]);
    }

    #[test]
    fn test_group_becomes_composite() {
        let forest = planner()
            .decompose(&goal("research (fetch a and fetch b), then summarize"))
            .unwrap();
        let composite = forest
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Composite && n.id != forest.root)
            .unwrap();
        assert_eq!(composite.label, "research");
        assert_eq!(composite.children.len(), 1);

        let summarize = forest
            .leaves()
            .find(|l| l.capability.as_deref() == Some("summarize"))
            .unwrap();
        assert_eq!(summarize.depends_on.len(), 1);
        assert_eq!(
            forest.node(summarize.depends_on[0]).unwrap().parent,
            Some(composite.id)
        );
    }

    #[test]
    fn test_requirement_outside_group_runs_first() {
        let forest = planner()
            .decompose(&goal("fetch the report (summarize it)"))
            .unwrap();
        assert_eq!(capabilities(&forest), vec!["fetch", "summarize"]);

        let composite = forest
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Composite && n.id != forest.root)
            .unwrap();
        assert_eq!(composite.label, "fetch the report");

        let fetch = forest.leaves().find(|l| l.capability.as_deref() == Some("fetch")).unwrap();
        let summarize = forest
            .leaves()
            .find(|l| l.capability.as_deref() == Some("summarize"))
            .unwrap();
        assert_eq!(fetch.parent, Some(composite.id));
        assert_eq!(summarize.parent, Some(composite.id));
        assert_eq!(summarize.depends_on, vec![fetch.id]);
    }

    #[test]
    fn test_requirement_outside_several_groups() {
        let forest = planner()
            .decompose(&goal("fetch it (summarize a) (email the team)"))
            .unwrap();
        let fetch = forest.leaves().find(|l| l.capability.as_deref() == Some("fetch")).unwrap();
        for cap in ["summarize", "send-email"] {
            let leaf = forest.leaves().find(|l| l.capability.as_deref() == Some(cap)).unwrap();
            assert_eq!(leaf.depends_on, vec![fetch.id], "{cap}");
        }
    }

    #[test]
    fn test_non_ascii_goal_text() {
        let forest = planner()
            .decompose(&goal("fetch the café menu, then summarize it / übersicht"))
            .unwrap();
        assert_eq!(capabilities(&forest), vec!["fetch", "summarize"]);
        assert_eq!(
            split_top_level("naïve; déjà vu, ok", SEQUENTIAL).unwrap(),
            vec!["naïve", "déjà vu", "ok"]
        );
    }

    #[test]
    fn test_depth_bound() {
        let deep = "(((((((fetch x)))))))";
        let err = planner().decompose(&goal(deep)).unwrap_err();
        assert_eq!(err, PlanningError::DepthExceeded { max_depth: 6 });

        let ok = "(((((fetch x)))))";
        assert!(planner().decompose(&goal(ok)).is_ok());
    }

    #[test]
    fn test_no_capability() {
        let err = planner().decompose(&goal("ponder the meaning of life")).unwrap_err();
        assert!(matches!(err, PlanningError::NoCapability { .. }));
    }

    #[test]
    fn test_unbalanced_parentheses() {
        let err = planner().decompose(&goal("fetch (a")).unwrap_err();
        assert!(matches!(err, PlanningError::UnbalancedParentheses { .. }));
    }

    #[test]
    fn test_acceptance_from_constraints() {
        let request = GoalRequest::new("summarize the doc").with_constraints(GoalConstraints {
            expected_fields: BTreeMap::from([("summarize".to_string(), vec!["summary".to_string()])]),
            ..GoalConstraints::default()
        });
        let forest = planner().decompose(&Goal::accept(request).unwrap()).unwrap();
        let leaf = forest.leaves().next().unwrap();
        assert!(leaf.acceptance.contains(&Criterion::FieldsPresent {
            fields: vec!["summary".into()]
        }));
    }

    #[test]
    fn test_inflections_match() {
        assert!(word_matches("fetch", "fetching"));
        assert!(word_matches("summarize", "summarizing"));
        assert!(word_matches("summarize", "summarizes"));
        assert!(!word_matches("fetch", "fetcher"));
    }

    fn recoverable(blamed: &str) -> Feedback {
        Feedback {
            criterion: "tool-succeeded".into(),
            detail: "404".into(),
            recoverable: true,
            blamed_tools: vec![blamed.into()],
            failure: Some(FailureKind::ToolFailed),
            rule_id: None,
        }
    }

    fn failed_fetch() -> (TaskForest, NodeId) {
        let mut forest = planner().decompose(&goal("fetch x, then summarize")).unwrap();
        let fetch = forest.leaves().next().unwrap().id;
        forest.promote_ready();
        forest.transition(fetch, NodeState::Running).unwrap();
        forest.transition(fetch, NodeState::Failed).unwrap();
        (forest, fetch)
    }

    #[test]
    fn test_replan_inserts_corrective_excluding_blamed() {
        let (mut forest, fetch) = failed_fetch();
        let outcome = planner().replan(&mut forest, fetch, &recoverable("web-fetch")).unwrap();
        let ReplanOutcome::Corrective(corrective) = outcome else {
            panic!("expected corrective, got {outcome:?}");
        };
        let node = forest.node(corrective).unwrap();
        assert_eq!(node.capability.as_deref(), Some("fetch"));
        assert!(node.excluded_tools.contains("web-fetch"));
        assert_eq!(node.parent, forest.node(fetch).unwrap().parent);
    }

    #[test]
    fn test_replan_is_deterministic_and_idempotent() {
        let (forest, fetch) = failed_fetch();
        let feedback = recoverable("web-fetch");

        let mut a = forest.clone();
        let mut b = forest.clone();
        let p = planner();
        let ra = p.replan(&mut a, fetch, &feedback).unwrap();
        let rb = p.replan(&mut b, fetch, &feedback).unwrap();
        assert_eq!(ra, rb);
        assert_eq!(a, b);

        let again = p.replan(&mut a, fetch, &feedback).unwrap();
        assert_eq!(again, ra);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_replan_gives_up() {
        let p = planner();

        // non-recoverable
        let (mut forest, fetch) = failed_fetch();
        let mut fb = recoverable("web-fetch");
        fb.recoverable = false;
        assert!(matches!(
            p.replan(&mut forest, fetch, &fb).unwrap(),
            ReplanOutcome::BranchFailed { .. }
        ));

        // both fetch tools blamed: no alternative
        let (mut forest, fetch) = failed_fetch();
        let mut fb = recoverable("web-fetch");
        fb.blamed_tools.push("mirror-fetch".into());
        let outcome = p.replan(&mut forest, fetch, &fb).unwrap();
        assert!(matches!(outcome, ReplanOutcome::BranchFailed { ref reason } if reason.contains("no alternative")));
    }

    #[test]
    fn test_replan_budget() {
        let p = Planner::new(
            registry(),
            PlannerConfig {
                max_replans: 1,
                ..PlannerConfig::default()
            },
        );
        let (mut forest, fetch) = failed_fetch();
        let ReplanOutcome::Corrective(first) = p.replan(&mut forest, fetch, &recoverable("x")).unwrap() else {
            panic!("expected corrective");
        };
        forest.promote_ready();
        forest.transition(first, NodeState::Running).unwrap();
        forest.transition(first, NodeState::Failed).unwrap();
        assert!(matches!(
            p.replan(&mut forest, first, &recoverable("y")).unwrap(),
            ReplanOutcome::BranchFailed { ref reason } if reason.contains("budget")
        ));
    }
}
