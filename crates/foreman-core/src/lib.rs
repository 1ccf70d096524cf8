//! Foreman Core Library
//!
//! Decomposes a goal into a task forest, runs each leaf through a tool picked
//! by capability inside an isolated execution context, verifies the results,
//! and gates every invocation behind a safety interlock.
//!
//! ## Key Components
//!
//! - `Planner`: goal text to task forest; corrective replanning
//! - `Orchestrator`: the per-run control loop
//! - `Executor`: runs one leaf with retries and tool fallback
//! - `ToolGateway`: safety check, approval, schema validation, invocation
//! - `SafetyInterlock`: goal constraints, circuit breaker, policy rules
//! - `ContextManager`: per-invocation working directories and quotas
//! - `Verifier`: acceptance criteria
//! - `ForemanService`: submit, status, cancel, approve

pub mod approval;
pub mod audit;
pub mod config;
pub mod context;
pub mod domain;
pub mod executor;
pub mod gateway;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod run;
pub mod safety;
pub mod service;
pub mod telemetry;
pub mod tools;
pub mod verifier;

pub use approval::{ApprovalBroker, ApprovalMode, ApprovalRequest, ApprovalResponse};
pub use audit::{AuditEntry, AuditEvent, AuditTrail, DenialRecord};
pub use config::{ConfigError, ForemanConfig, SafetyConfig};
pub use context::{
    ContextConfig, ContextError, ContextLease, ContextManager, ContextQuota, ContextState,
    ExecutionContext, NetworkPolicy,
};
pub use domain::{
    Criterion, FailureDetail, FailureKind, Feedback, ForemanError, ForestCounts, ForestError,
    Goal, GoalConstraints, GoalRequest, InvocationRecord, InvocationResult, JsonFieldSchema,
    NodeId, NodeKind, NodeState, Outcome, Result, RiskLevel, SubTask, TaskForest,
    ToolDescriptor,
};
pub use executor::{Executor, ExecutorConfig, ExecutorError, SubTaskSpec};
pub use gateway::{GatewayConfig, GatewayResult, InvocationRequest, ToolGateway};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunFailure, RunStatusReport};
pub use planner::{Planner, PlannerConfig, PlanningError, ReplanOutcome};
pub use registry::{ManifestTool, RegisteredTool, RegistryError, ToolManifest, ToolRegistry};
pub use run::RunContext;
pub use safety::{
    BreakerConfig, BreakerState, PolicySet, RuleMatch, SafetyDecision, SafetyInterlock,
    SafetyRule, SafetyVerdict,
};
pub use service::ForemanService;
pub use tools::{HandlerSpec, ToolAdapter, ToolError, ToolHandler};
pub use verifier::{Verdict, Verifier};

pub use foreman_state::{RunId, RunRecord, RunStatus, RunStore};
