//! The task forest: hierarchical decomposition of a goal with dependency edges.
//!
//! Nodes live in an arena indexed by [`NodeId`]. `parent`/`children` describe
//! the decomposition hierarchy; `depends_on` describes execution order. Only
//! leaves are dispatched. A composite's state is derived from its children.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::outcome::FailureKind;

/// Index of a node in its forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Composite,
    Leaf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    NeedsRetry,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::NeedsRetry => "needs_retry",
        };
        f.write_str(s)
    }
}

/// A machine-checkable acceptance criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "criterion", rename_all = "kebab-case")]
pub enum Criterion {
    ToolSucceeded,
    NonEmptyPayload,
    FieldsPresent { fields: Vec<String> },
    BeforeDeadline { deadline: DateTime<Utc> },
}

impl Criterion {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ToolSucceeded => "tool-succeeded",
            Self::NonEmptyPayload => "non-empty-payload",
            Self::FieldsPresent { .. } => "fields-present",
            Self::BeforeDeadline { .. } => "before-deadline",
        }
    }
}

/// Verifier feedback explaining a rejected outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Name of the criterion that failed.
    pub criterion: String,
    pub detail: String,
    /// Whether another tool or attempt could plausibly succeed.
    pub recoverable: bool,
    /// Tools whose invocations produced the failure.
    #[serde(default)]
    pub blamed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// A node of the task forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: NodeId,
    pub label: String,
    pub kind: NodeKind,
    /// Goal text this node was extracted from.
    pub clause: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Prerequisites that must succeed before this node is dispatched.
    pub depends_on: Vec<NodeId>,
    /// Required capability tag. Leaves only.
    pub capability: Option<String>,
    pub acceptance: Vec<Criterion>,
    pub state: NodeState,
    /// Requeues after verifier rejection.
    pub retries: u32,
    pub payload: Option<Value>,
    pub feedback: Option<Feedback>,
    /// Tools the executor must not pick for this node.
    pub excluded_tools: BTreeSet<String>,
    /// Set when a corrective node has replaced this one.
    pub superseded_by: Option<NodeId>,
    /// Set on a corrective node: the node it replaces.
    pub corrective_of: Option<NodeId>,
    /// Number of replans along this node's corrective chain.
    pub replan_depth: u32,
}

impl SubTask {
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }
}

/// Node counts by state, ignoring superseded nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestCounts {
    pub leaves: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub needs_retry: usize,
    pub superseded: usize,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ForestError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node {0} is not a leaf")]
    NotALeaf(NodeId),

    #[error("node {0} is not a composite")]
    NotAComposite(NodeId),

    #[error("illegal transition for {node}: {from} -> {to}")]
    IllegalTransition {
        node: NodeId,
        from: NodeState,
        to: NodeState,
    },

    #[error("node {node} depends on unknown node {missing}")]
    MissingDependency { node: NodeId, missing: NodeId },

    #[error("dependency cycle detected")]
    CycleDetected,
}

/// Goal decomposition with dependency edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskForest {
    pub goal_id: String,
    pub root: NodeId,
    pub nodes: Vec<SubTask>,
}

impl TaskForest {
    /// A forest holding only a composite root.
    pub fn new(goal_id: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        let root = SubTask {
            id: NodeId(0),
            clause: label.clone(),
            label,
            kind: NodeKind::Composite,
            parent: None,
            children: Vec::new(),
            depends_on: Vec::new(),
            capability: None,
            acceptance: Vec::new(),
            state: NodeState::Pending,
            retries: 0,
            payload: None,
            feedback: None,
            excluded_tools: BTreeSet::new(),
            superseded_by: None,
            corrective_of: None,
            replan_depth: 0,
        };
        Self {
            goal_id: goal_id.into(),
            root: NodeId(0),
            nodes: vec![root],
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&SubTask> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SubTask> {
        self.nodes.get_mut(id.0)
    }

    fn get(&self, id: NodeId) -> Result<&SubTask, ForestError> {
        self.node(id).ok_or(ForestError::UnknownNode(id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut SubTask, ForestError> {
        self.node_mut(id).ok_or(ForestError::UnknownNode(id))
    }

    pub fn root_state(&self) -> NodeState {
        self.nodes[self.root.0].state
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn leaves(&self) -> impl Iterator<Item = &SubTask> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Leaves that still count towards completion.
    pub fn active_leaves(&self) -> impl Iterator<Item = &SubTask> {
        self.leaves().filter(|n| !n.is_superseded())
    }

    pub fn add_composite(
        &mut self,
        parent: NodeId,
        label: impl Into<String>,
        clause: impl Into<String>,
    ) -> Result<NodeId, ForestError> {
        self.push_child(parent, |id| SubTask {
            id,
            label: label.into(),
            kind: NodeKind::Composite,
            clause: clause.into(),
            parent: Some(parent),
            children: Vec::new(),
            depends_on: Vec::new(),
            capability: None,
            acceptance: Vec::new(),
            state: NodeState::Pending,
            retries: 0,
            payload: None,
            feedback: None,
            excluded_tools: BTreeSet::new(),
            superseded_by: None,
            corrective_of: None,
            replan_depth: 0,
        })
    }

    pub fn add_leaf(
        &mut self,
        parent: NodeId,
        capability: impl Into<String>,
        clause: impl Into<String>,
        acceptance: Vec<Criterion>,
        depends_on: Vec<NodeId>,
    ) -> Result<NodeId, ForestError> {
        for dep in &depends_on {
            self.get(*dep)?;
        }
        let capability = capability.into();
        self.push_child(parent, |id| SubTask {
            id,
            label: capability.clone(),
            kind: NodeKind::Leaf,
            clause: clause.into(),
            parent: Some(parent),
            children: Vec::new(),
            depends_on,
            capability: Some(capability),
            acceptance,
            state: NodeState::Pending,
            retries: 0,
            payload: None,
            feedback: None,
            excluded_tools: BTreeSet::new(),
            superseded_by: None,
            corrective_of: None,
            replan_depth: 0,
        })
    }

    fn push_child(
        &mut self,
        parent: NodeId,
        build: impl FnOnce(NodeId) -> SubTask,
    ) -> Result<NodeId, ForestError> {
        if self.get(parent)?.kind != NodeKind::Composite {
            return Err(ForestError::NotAComposite(parent));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(build(id));
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Insert a corrective sibling for a failed leaf.
    ///
    /// The corrective node copies the failed node's capability, clause,
    /// acceptance criteria and prerequisites, excludes `excluded_tools`, and
    /// takes over every dependency edge that pointed at the failed node.
    pub fn insert_corrective(
        &mut self,
        failed: NodeId,
        excluded_tools: BTreeSet<String>,
        feedback: Feedback,
    ) -> Result<NodeId, ForestError> {
        let original = self.get(failed)?.clone();
        if !original.is_leaf() {
            return Err(ForestError::NotALeaf(failed));
        }
        let parent = original.parent.ok_or(ForestError::NotALeaf(failed))?;
        let replan_depth = original.replan_depth + 1;
        let capability = original.capability.clone().unwrap_or_default();

        let corrective = self.push_child(parent, |id| SubTask {
            id,
            label: format!("{capability} (corrective {replan_depth})"),
            kind: NodeKind::Leaf,
            clause: original.clause.clone(),
            parent: Some(parent),
            children: Vec::new(),
            depends_on: original.depends_on.clone(),
            capability: original.capability.clone(),
            acceptance: original.acceptance.clone(),
            state: NodeState::Pending,
            retries: 0,
            payload: None,
            feedback: Some(feedback),
            excluded_tools,
            superseded_by: None,
            corrective_of: Some(failed),
            replan_depth,
        })?;

        for node in &mut self.nodes {
            for dep in &mut node.depends_on {
                if *dep == failed && node.id != corrective {
                    *dep = corrective;
                }
            }
        }
        self.nodes[failed.0].superseded_by = Some(corrective);
        Ok(corrective)
    }

    /// Nodes whose `depends_on` includes `id`.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.depends_on.contains(&id))
            .map(|n| n.id)
            .collect()
    }

    /// Move a leaf to `to`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, id: NodeId, to: NodeState) -> Result<NodeState, ForestError> {
        let node = self.get_mut(id)?;
        if !node.is_leaf() {
            return Err(ForestError::NotALeaf(id));
        }
        let from = node.state;
        let legal = matches!(
            (from, to),
            (NodeState::Pending, NodeState::Ready)
                | (NodeState::Pending, NodeState::Failed)
                | (NodeState::Ready, NodeState::Running)
                | (NodeState::Ready, NodeState::Failed)
                | (NodeState::Running, NodeState::Succeeded)
                | (NodeState::Running, NodeState::Failed)
                | (NodeState::Running, NodeState::NeedsRetry)
                | (NodeState::NeedsRetry, NodeState::Ready)
                | (NodeState::NeedsRetry, NodeState::Failed)
        );
        if !legal {
            return Err(ForestError::IllegalTransition { node: id, from, to });
        }
        node.state = to;
        Ok(from)
    }

    fn deps_succeeded(&self, node: &SubTask) -> bool {
        node.depends_on.iter().all(|d| {
            self.node(*d)
                .is_some_and(|dep| dep.state == NodeState::Succeeded)
        })
    }

    /// Promote pending leaves whose prerequisites have all succeeded.
    ///
    /// Returns the promoted ids in ascending order.
    pub fn promote_ready(&mut self) -> Vec<NodeId> {
        let promotable: Vec<NodeId> = self
            .active_leaves()
            .filter(|n| n.state == NodeState::Pending && self.deps_succeeded(n))
            .map(|n| n.id)
            .collect();
        for id in &promotable {
            self.nodes[id.0].state = NodeState::Ready;
        }
        promotable
    }

    /// Lowest-id ready leaf.
    pub fn next_ready(&self) -> Option<NodeId> {
        self.active_leaves()
            .find(|n| n.state == NodeState::Ready)
            .map(|n| n.id)
    }

    /// Recompute composite states bottom-up and return the root's state.
    ///
    /// Superseded children are ignored. A composite fails when any remaining
    /// child failed, succeeds when every remaining child succeeded, and is
    /// running once any child has left `Pending`.
    pub fn refresh_composites(&mut self) -> NodeState {
        // Children always have larger ids than their parent.
        for idx in (0..self.nodes.len()).rev() {
            if self.nodes[idx].kind != NodeKind::Composite {
                continue;
            }
            let states: Vec<NodeState> = self.nodes[idx]
                .children
                .iter()
                .map(|c| &self.nodes[c.0])
                .filter(|c| !c.is_superseded())
                .map(|c| c.state)
                .collect();
            let state = if states.iter().any(|s| *s == NodeState::Failed) {
                NodeState::Failed
            } else if !states.is_empty() && states.iter().all(|s| *s == NodeState::Succeeded) {
                NodeState::Succeeded
            } else if states.iter().any(|s| *s != NodeState::Pending) {
                NodeState::Running
            } else {
                NodeState::Pending
            };
            self.nodes[idx].state = state;
        }
        self.root_state()
    }

    /// Check for dangling references and dependency cycles (Kahn's algorithm).
    pub fn validate(&self) -> Result<(), ForestError> {
        for node in &self.nodes {
            for dep in &node.depends_on {
                if self.node(*dep).is_none() {
                    return Err(ForestError::MissingDependency {
                        node: node.id,
                        missing: *dep,
                    });
                }
            }
        }

        let mut indegree: BTreeMap<NodeId, usize> =
            self.nodes.iter().map(|n| (n.id, 0usize)).collect();
        let mut edges: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for node in &self.nodes {
            for dep in &node.depends_on {
                edges.entry(*dep).or_default().push(node.id);
                *indegree.entry(node.id).or_default() += 1;
            }
        }

        let mut queue: VecDeque<NodeId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();

        let mut visited = 0usize;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            if let Some(neighbors) = edges.get(&node) {
                for n in neighbors {
                    if let Some(entry) = indegree.get_mut(n) {
                        *entry -= 1;
                        if *entry == 0 {
                            queue.push_back(*n);
                        }
                    }
                }
            }
        }

        if visited != self.nodes.len() {
            return Err(ForestError::CycleDetected);
        }
        Ok(())
    }

    pub fn counts(&self) -> ForestCounts {
        let mut counts = ForestCounts::default();
        for leaf in self.leaves() {
            if leaf.is_superseded() {
                counts.superseded += 1;
                continue;
            }
            counts.leaves += 1;
            match leaf.state {
                NodeState::Pending => counts.pending += 1,
                NodeState::Ready => counts.ready += 1,
                NodeState::Running => counts.running += 1,
                NodeState::Succeeded => counts.succeeded += 1,
                NodeState::Failed => counts.failed += 1,
                NodeState::NeedsRetry => counts.needs_retry += 1,
            }
        }
        counts
    }

    /// Payloads of succeeded prerequisites, keyed by capability.
    pub fn upstream_payloads(&self, id: NodeId) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        if let Some(node) = self.node(id) {
            for dep in &node.depends_on {
                if let Some(dep) = self.node(*dep) {
                    if let (Some(cap), Some(payload)) = (&dep.capability, &dep.payload) {
                        out.insert(cap.clone(), payload.clone());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback() -> Feedback {
        Feedback {
            criterion: "tool-succeeded".into(),
            detail: "boom".into(),
            recoverable: true,
            blamed_tools: vec!["a".into()],
            failure: Some(FailureKind::ToolFailed),
            rule_id: None,
        }
    }

    fn chain() -> (TaskForest, NodeId, NodeId) {
        let mut forest = TaskForest::new("g", "fetch and summarize");
        let fetch = forest
            .add_leaf(forest.root, "fetch", "fetch x", vec![], vec![])
            .unwrap();
        let summarize = forest
            .add_leaf(forest.root, "summarize", "summarize", vec![], vec![fetch])
            .unwrap();
        (forest, fetch, summarize)
    }

    #[test]
    fn test_promote_respects_dependencies() {
        let (mut forest, fetch, summarize) = chain();
        assert_eq!(forest.promote_ready(), vec![fetch]);
        assert_eq!(forest.next_ready(), Some(fetch));

        forest.transition(fetch, NodeState::Running).unwrap();
        forest.transition(fetch, NodeState::Succeeded).unwrap();
        assert_eq!(forest.promote_ready(), vec![summarize]);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let (mut forest, fetch, _) = chain();
        let err = forest.transition(fetch, NodeState::Succeeded).unwrap_err();
        assert!(matches!(err, ForestError::IllegalTransition { .. }));
        let err = forest.transition(forest.root, NodeState::Ready).unwrap_err();
        assert_eq!(err, ForestError::NotALeaf(NodeId(0)));
    }

    #[test]
    fn test_composite_state_derivation() {
        let (mut forest, fetch, summarize) = chain();
        assert_eq!(forest.refresh_composites(), NodeState::Pending);

        forest.promote_ready();
        forest.transition(fetch, NodeState::Running).unwrap();
        assert_eq!(forest.refresh_composites(), NodeState::Running);

        forest.transition(fetch, NodeState::Succeeded).unwrap();
        forest.promote_ready();
        forest.transition(summarize, NodeState::Running).unwrap();
        forest.transition(summarize, NodeState::Succeeded).unwrap();
        assert_eq!(forest.refresh_composites(), NodeState::Succeeded);
    }

    #[test]
    fn test_corrective_rewires_dependents_and_hides_failure() {
        let (mut forest, fetch, summarize) = chain();
        forest.promote_ready();
        forest.transition(fetch, NodeState::Running).unwrap();
        forest.transition(fetch, NodeState::Failed).unwrap();
        assert_eq!(forest.refresh_composites(), NodeState::Failed);

        let corrective = forest
            .insert_corrective(fetch, BTreeSet::from(["a".to_string()]), feedback())
            .unwrap();
        assert_eq!(forest.node(summarize).unwrap().depends_on, vec![corrective]);
        assert_eq!(forest.node(fetch).unwrap().superseded_by, Some(corrective));
        assert_eq!(forest.node(corrective).unwrap().replan_depth, 1);
        assert!(forest.validate().is_ok());

        // the failed node no longer counts against the root
        assert_eq!(forest.refresh_composites(), NodeState::Pending);
        assert_eq!(forest.promote_ready(), vec![corrective]);
    }

    #[test]
    fn test_cycle_detected() {
        let (mut forest, fetch, summarize) = chain();
        forest.node_mut(fetch).unwrap().depends_on.push(summarize);
        assert_eq!(forest.validate(), Err(ForestError::CycleDetected));
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let mut forest = TaskForest::new("g", "x");
        let err = forest
            .add_leaf(forest.root, "fetch", "x", vec![], vec![NodeId(9)])
            .unwrap_err();
        assert_eq!(err, ForestError::UnknownNode(NodeId(9)));
    }

    #[test]
    fn test_counts_skip_superseded() {
        let (mut forest, fetch, _) = chain();
        forest.promote_ready();
        forest.transition(fetch, NodeState::Running).unwrap();
        forest.transition(fetch, NodeState::Failed).unwrap();
        forest
            .insert_corrective(fetch, BTreeSet::new(), feedback())
            .unwrap();
        let counts = forest.counts();
        assert_eq!(counts.leaves, 2);
        assert_eq!(counts.superseded, 1);
        assert_eq!(counts.failed, 0);
    }

    #[test]
    fn test_forest_serializes() {
        let (forest, _, _) = chain();
        let json = serde_json::to_value(&forest).unwrap();
        assert_eq!(json["nodes"][2]["depends_on"][0], 1);
        let back: TaskForest = serde_json::from_value(json).unwrap();
        assert_eq!(back, forest);
    }
}
