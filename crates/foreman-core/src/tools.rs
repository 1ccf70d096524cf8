//! Tool handlers: the code that runs when the gateway invokes a tool.
//!
//! Manifests can declare three built-in handler kinds (`echo`, `fixed`,
//! `command`). Embedders register anything else through [`ToolAdapter`].

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::domain::ToolDescriptor;

/// Exit status a command handler uses to report a retryable failure
/// (`EX_TEMPFAIL` from sysexits.h).
pub const EXIT_TEMPFAIL: i32 = 75;

/// How a tool invocation failed.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ToolError {
    /// Worth retrying with the same tool (timeouts, rate limits).
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying the same tool will not help.
    #[error("permanent: {0}")]
    Permanent(String),

    /// The tool reported a harmful side effect.
    #[error("harmful: {0}")]
    Harmful(String),
}

impl ToolError {
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) | Self::Harmful(m) => m,
        }
    }
}

/// Adapter trait for embedder-provided tools.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn call(
        &self,
        tool: &ToolDescriptor,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ToolError>;
}

/// Handler declaration as it appears in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerSpec {
    /// Returns the invocation input unchanged.
    Echo,
    /// Returns a fixed payload.
    Fixed { output: Value },
    /// Runs a program in the context's working directory. The input is written
    /// to stdin as JSON; stdout must be a JSON document.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Runtime handler bound to a registered tool.
#[derive(Clone)]
pub enum ToolHandler {
    Echo,
    Fixed(Value),
    Command { program: String, args: Vec<String> },
    External(Arc<dyn ToolAdapter>),
}

impl std::fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Echo => write!(f, "Echo"),
            Self::Fixed(v) => f.debug_tuple("Fixed").field(v).finish(),
            Self::Command { program, args } => f
                .debug_struct("Command")
                .field("program", program)
                .field("args", args)
                .finish(),
            Self::External(_) => write!(f, "External(..)"),
        }
    }
}

impl From<HandlerSpec> for ToolHandler {
    fn from(spec: HandlerSpec) -> Self {
        match spec {
            HandlerSpec::Echo => Self::Echo,
            HandlerSpec::Fixed { output } => Self::Fixed(output),
            HandlerSpec::Command { program, args } => Self::Command { program, args },
        }
    }
}

impl ToolHandler {
    pub fn external(adapter: impl ToolAdapter + 'static) -> Self {
        Self::External(Arc::new(adapter))
    }

    pub async fn invoke(
        &self,
        tool: &ToolDescriptor,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ToolError> {
        match self {
            Self::Echo => Ok(input.clone()),
            Self::Fixed(output) => Ok(output.clone()),
            Self::Command { program, args } => run_command(program, args, input, ctx).await,
            Self::External(adapter) => adapter.call(tool, input, ctx).await,
        }
    }
}

async fn run_command(
    program: &str,
    args: &[String],
    input: &Value,
    ctx: &ExecutionContext,
) -> Result<Value, ToolError> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .current_dir(&ctx.workdir)
        .env("FOREMAN_CONTEXT_ID", &ctx.id)
        .env("FOREMAN_NETWORK", ctx.quota.network.to_string())
        .env("FOREMAN_CPU_TIME_MS", ctx.quota.cpu_time_ms.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ToolError::Permanent(format!("failed to spawn {program}: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        let bytes = serde_json::to_vec(input)
            .map_err(|e| ToolError::Permanent(format!("input not serializable: {e}")))?;
        // A program that never reads stdin closes the pipe early; not an error.
        if let Err(e) = stdin.write_all(&bytes).await {
            debug!(program, error = %e, "stdin closed before input was written");
        }
    }

    let wall_clock = Duration::from_millis(ctx.quota.wall_clock_ms);
    let output = tokio::time::timeout(wall_clock, child.wait_with_output())
        .await
        .map_err(|_| {
            ToolError::Transient(format!(
                "{program} exceeded wall-clock quota of {}ms",
                ctx.quota.wall_clock_ms
            ))
        })?
        .map_err(|e| ToolError::Transient(format!("{program} wait failed: {e}")))?;

    match output.status.code() {
        Some(0) => serde_json::from_slice(&output.stdout)
            .map_err(|e| ToolError::Permanent(format!("{program} produced invalid JSON: {e}"))),
        Some(EXIT_TEMPFAIL) => Err(ToolError::Transient(stderr_tail(&output.stderr, program))),
        Some(code) => Err(ToolError::Permanent(format!(
            "exit {code}: {}",
            stderr_tail(&output.stderr, program)
        ))),
        None => Err(ToolError::Transient(format!("{program} killed by signal"))),
    }
}

fn stderr_tail(stderr: &[u8], program: &str) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return format!("{program} failed without output");
    }
    let start = trimmed
        .char_indices()
        .rev()
        .nth(511)
        .map(|(i, _)| i)
        .unwrap_or(0);
    trimmed[start..].to_string()
}
