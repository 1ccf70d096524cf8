//! Goals and their constraints.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tool::RiskLevel;

/// Constraints a caller attaches to a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalConstraints {
    /// Absolute deadline; work still outstanding after it fails the run.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// Highest tool risk this goal permits.
    #[serde(default = "default_safety_tier")]
    pub safety_tier: RiskLevel,
    /// When set, only these tool ids may be invoked.
    #[serde(default)]
    pub allowed_tools: Option<BTreeSet<String>>,
    /// Fields the payload of a given capability must carry to be accepted.
    #[serde(default)]
    pub expected_fields: BTreeMap<String, Vec<String>>,
}

fn default_safety_tier() -> RiskLevel {
    RiskLevel::Elevated
}

impl Default for GoalConstraints {
    fn default() -> Self {
        Self {
            deadline: None,
            safety_tier: default_safety_tier(),
            allowed_tools: None,
            expected_fields: BTreeMap::new(),
        }
    }
}

impl GoalConstraints {
    pub fn permits_risk(&self, risk: RiskLevel) -> bool {
        risk <= self.safety_tier
    }

    pub fn permits_tool(&self, tool_id: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .map_or(true, |allowed| allowed.contains(tool_id))
    }

    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

/// What a caller submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalRequest {
    pub description: String,
    #[serde(default)]
    pub constraints: GoalConstraints,
}

impl GoalRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            constraints: GoalConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: GoalConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// An accepted goal. Immutable for the life of its run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    pub constraints: GoalConstraints,
    pub accepted_at: DateTime<Utc>,
}

impl Goal {
    /// Accept a request, assigning it a fresh id.
    ///
    /// Returns `None` for a blank description.
    pub fn accept(request: GoalRequest) -> Option<Self> {
        let description = request.description.trim().to_string();
        if description.is_empty() {
            return None;
        }
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            description,
            constraints: request.constraints,
            accepted_at: Utc::now(),
        })
    }
}
