//! Domain-level error taxonomy for Foreman.

use foreman_state::StorageError;

use crate::approval::ApprovalError;
use crate::config::ConfigError;
use crate::context::ContextError;
use crate::planner::PlanningError;
use crate::registry::RegistryError;

/// Foreman errors surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum ForemanError {
    #[error("transient failure from tool {tool_id}: {message}")]
    TransientToolError { tool_id: String, message: String },

    #[error("permanent failure from tool {tool_id}: {message}")]
    PermanentToolError { tool_id: String, message: String },

    #[error("denied by safety rule {rule_id}: {reason}")]
    SafetyDenied { rule_id: String, reason: String },

    #[error("planning exhausted: {reason}")]
    PlanningExhausted { reason: String },

    #[error("context provisioning failed: {0}")]
    ContextProvisionError(#[from] ContextError),

    #[error("cancellation requested")]
    CancellationRequested,

    #[error("invalid goal: {0}")]
    InvalidGoal(String),

    #[error("unknown run: {run_id}")]
    UnknownRun { run_id: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<PlanningError> for ForemanError {
    fn from(err: PlanningError) -> Self {
        Self::PlanningExhausted {
            reason: err.to_string(),
        }
    }
}

/// Result type for Foreman operations.
pub type Result<T> = std::result::Result<T, ForemanError>;
