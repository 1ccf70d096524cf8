//! Domain models for Foreman.
//!
//! Canonical definitions for the core entities:
//! - `Goal`: an accepted request with its constraints
//! - `TaskForest` / `SubTask`: the decomposition of a goal
//! - `ToolDescriptor`: a registered capability provider
//! - `Outcome`: what an executor reports for a sub-task

pub mod error;
pub mod forest;
pub mod goal;
pub mod outcome;
pub mod tool;

pub use error::{ForemanError, Result};
pub use forest::{
    Criterion, Feedback, ForestCounts, ForestError, NodeId, NodeKind, NodeState, SubTask,
    TaskForest,
};
pub use goal::{Goal, GoalConstraints, GoalRequest};
pub use outcome::{FailureDetail, FailureKind, InvocationRecord, InvocationResult, Outcome};
pub use tool::{JsonFieldSchema, RiskLevel, ToolDescriptor};
