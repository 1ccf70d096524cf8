//! Foreman CLI
//!
//! The `foreman` command runs goals against a tool manifest and inspects
//! persisted runs.
//!
//! ## Commands
//!
//! - `run`: decompose a goal, execute it, print the final report
//! - `plan`: show the task forest for a goal without running anything
//! - `status`: show a persisted run record
//! - `audit`: dump a persisted run's audit log
//! - `runs`: list persisted runs
//! - `manifest`: validate a tool manifest and list its tools

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

use foreman_core::metrics::METRICS;
use foreman_core::telemetry::LogFormat;
use foreman_core::{
    ApprovalMode, ApprovalResponse, ForemanConfig, ForemanService, GoalConstraints, GoalRequest,
    RiskLevel, RunStatus, RunStatusReport, TaskForest, ToolManifest, ToolRegistry,
};
use foreman_state::{FsRunStore, RunId, RunStore};

#[derive(Parser)]
#[command(name = "foreman")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Goal decomposition and safe tool orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// State directory; runs are persisted under `<dir>/runs/`
    #[arg(long, global = true, env = "FOREMAN_STATE_DIR", default_value = ".foreman")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a goal to completion
    Run {
        /// Tool manifest (TOML, or JSON by extension)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Goal description
        goal: String,

        #[command(flatten)]
        constraints: ConstraintArgs,

        /// Service configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Approve every `confirm` verdict without asking
        #[arg(long, conflicts_with = "deny_confirmations")]
        auto_approve: bool,

        /// Deny every `confirm` verdict without asking
        #[arg(long)]
        deny_confirmations: bool,
    },

    /// Show how a goal would be decomposed
    Plan {
        #[arg(short, long)]
        manifest: PathBuf,

        goal: String,

        #[command(flatten)]
        constraints: ConstraintArgs,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show a persisted run
    Status {
        run_id: String,
    },

    /// Print a persisted run's audit log as JSON lines
    Audit {
        run_id: String,
    },

    /// List persisted runs
    Runs,

    /// Validate a tool manifest and list its tools
    Manifest {
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct ConstraintArgs {
    /// Highest tool risk the goal permits
    #[arg(long, value_enum, default_value_t = Tier::Elevated)]
    safety_tier: Tier,

    /// Seconds from now until the goal's deadline
    #[arg(long)]
    deadline_secs: Option<i64>,

    /// Restrict the goal to these tool ids (repeatable)
    #[arg(long = "allow-tool")]
    allowed_tools: Vec<String>,

    /// Required payload fields per capability, as `capability=field`
    #[arg(long = "expect", value_parser = parse_expectation)]
    expected_fields: Vec<(String, String)>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Tier {
    Low,
    Elevated,
    Irreversible,
}

impl From<Tier> for RiskLevel {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Low => RiskLevel::Low,
            Tier::Elevated => RiskLevel::Elevated,
            Tier::Irreversible => RiskLevel::Irreversible,
        }
    }
}

fn parse_expectation(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((cap, field)) if !cap.is_empty() && !field.is_empty() => {
            Ok((cap.to_string(), field.to_string()))
        }
        _ => Err(format!("expected capability=field, got '{s}'")),
    }
}

impl ConstraintArgs {
    fn to_constraints(&self) -> GoalConstraints {
        let mut expected: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (cap, field) in &self.expected_fields {
            expected.entry(cap.clone()).or_default().push(field.clone());
        }
        GoalConstraints {
            deadline: self
                .deadline_secs
                .map(|s| chrono::Utc::now() + chrono::Duration::seconds(s)),
            safety_tier: self.safety_tier.into(),
            allowed_tools: (!self.allowed_tools.is_empty())
                .then(|| self.allowed_tools.iter().cloned().collect::<BTreeSet<_>>()),
            expected_fields: expected,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    foreman_core::telemetry::init_tracing(LogFormat::from_json_flag(cli.json), level);

    let result = match cli.command {
        Commands::Run {
            manifest,
            goal,
            constraints,
            config,
            auto_approve,
            deny_confirmations,
        } => {
            let mut config = load_config(config.as_deref())?;
            if auto_approve {
                config.safety.approval_mode = ApprovalMode::AutoApprove;
            } else if deny_confirmations {
                config.safety.approval_mode = ApprovalMode::AutoDeny;
            }
            let request = GoalRequest::new(goal).with_constraints(constraints.to_constraints());
            cmd_run(&cli.state_dir, &manifest, config, request).await
        }
        Commands::Plan {
            manifest,
            goal,
            constraints,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let request = GoalRequest::new(goal).with_constraints(constraints.to_constraints());
            cmd_plan(&manifest, config, request)
        }
        Commands::Status { run_id } => cmd_status(&cli.state_dir, &run_id).await,
        Commands::Audit { run_id } => cmd_audit(&cli.state_dir, &run_id).await,
        Commands::Runs => cmd_runs(&cli.state_dir).await,
        Commands::Manifest { path } => cmd_manifest(&path),
    };

    METRICS.flush();
    result
}

fn load_config(path: Option<&Path>) -> Result<ForemanConfig> {
    match path {
        Some(path) => ForemanConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(ForemanConfig::default()),
    }
}

fn load_registry(path: &Path) -> Result<ToolRegistry> {
    let manifest = ToolManifest::load(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    ToolRegistry::from_manifest(manifest)
        .with_context(|| format!("Invalid manifest {}", path.display()))
}

fn open_store(state_dir: &Path) -> Result<FsRunStore> {
    FsRunStore::new(state_dir)
        .with_context(|| format!("Failed to open state directory {}", state_dir.display()))
}

/// Run a goal and print its final report.
async fn cmd_run(
    state_dir: &Path,
    manifest: &Path,
    config: ForemanConfig,
    request: GoalRequest,
) -> Result<()> {
    let registry = load_registry(manifest)?;
    let store: Arc<dyn RunStore> = Arc::new(open_store(state_dir)?);
    let manual = config.safety.approval_mode == ApprovalMode::Manual;
    let service = ForemanService::new(config, registry, store)?;

    let run_id = service.submit(request)?;
    eprintln!("run {run_id} started");

    if manual {
        tokio::spawn(prompt_approvals(service.clone(), run_id.clone()));
    }

    let report = tokio::select! {
        report = service.wait(&run_id) => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id = %run_id, "interrupted, cancelling run");
            service.cancel(&run_id)?;
            service.wait(&run_id).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    print_summary(&report);

    if report.status != RunStatus::Completed {
        bail!("run {} finished {}", run_id, report.status);
    }
    Ok(())
}

/// Ask on stdin for every approval the run waits on.
async fn prompt_approvals(service: ForemanService, run_id: RunId) {
    let Ok(mut updates) = service.subscribe(&run_id) else {
        return;
    };
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut asked: HashSet<String> = HashSet::new();

    loop {
        let pending = match service.pending_approvals(&run_id) {
            Ok(pending) => pending,
            Err(_) => return,
        };
        for request in pending {
            if !asked.insert(request.invocation_id.clone()) {
                continue;
            }
            eprintln!(
                "approve {} ({}) for '{}'? rule {}: {} [y/N]",
                request.tool_id, request.capability, run_id, request.rule_id, request.reason
            );
            let approved = matches!(
                stdin.next_line().await,
                Ok(Some(line)) if line.trim().eq_ignore_ascii_case("y")
            );
            let response = ApprovalResponse {
                run_id: run_id.clone(),
                invocation_id: request.invocation_id,
                approved,
            };
            if let Err(e) = service.approve(response) {
                warn!(error = %e, "approval no longer pending");
            }
        }
        let finished = updates.borrow().is_terminal();
        if finished || updates.changed().await.is_err() {
            return;
        }
    }
}

fn print_summary(report: &RunStatusReport) {
    let c = &report.counts;
    eprintln!(
        "run {}: {} ({} leaves, {} succeeded, {} failed, {} replaced)",
        report.run_id, report.status, c.leaves, c.succeeded, c.failed, c.superseded
    );
    for denial in &report.denials {
        eprintln!(
            "  denied {} at {} by {}: {}",
            denial.tool_id, denial.node_id, denial.rule_id, denial.reason
        );
    }
    if let Some(failure) = &report.failure {
        eprintln!("  failure: {failure}");
    }
}

/// Decompose a goal and print the forest.
fn cmd_plan(manifest: &Path, config: ForemanConfig, request: GoalRequest) -> Result<()> {
    let registry = load_registry(manifest)?;
    let store: Arc<dyn RunStore> = Arc::new(foreman_state::MemoryRunStore::new());
    let service = ForemanService::new(config, registry, store)?;
    let forest = service.plan(request)?;
    print_forest(&forest);
    Ok(())
}

fn print_forest(forest: &TaskForest) {
    fn walk(forest: &TaskForest, id: foreman_core::NodeId, indent: usize) {
        let Some(node) = forest.node(id) else {
            return;
        };
        let pad = "  ".repeat(indent);
        let after = if node.depends_on.is_empty() {
            String::new()
        } else {
            let deps: Vec<String> = node.depends_on.iter().map(|d| d.to_string()).collect();
            format!(" after {}", deps.join(", "))
        };
        match &node.capability {
            Some(cap) => println!("{pad}{id} [{cap}] {}{after}", node.clause),
            None => println!("{pad}{id} {}", node.label),
        }
        for child in &node.children {
            walk(forest, *child, indent + 1);
        }
    }
    walk(forest, forest.root, 0);
}

async fn cmd_status(state_dir: &Path, run_id: &str) -> Result<()> {
    let store = open_store(state_dir)?;
    let record = store
        .get_run(&RunId::from(run_id))
        .await
        .with_context(|| format!("No run {run_id} in {}", state_dir.display()))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_audit(state_dir: &Path, run_id: &str) -> Result<()> {
    let store = open_store(state_dir)?;
    let entries = store
        .get_audit(&RunId::from(run_id))
        .await
        .with_context(|| format!("No audit log for run {run_id}"))?;
    for entry in entries {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}

async fn cmd_runs(state_dir: &Path) -> Result<()> {
    let store = open_store(state_dir)?;
    let runs = store.list_runs().await?;
    if runs.is_empty() {
        println!("No runs in {}", state_dir.display());
        return Ok(());
    }
    for record in runs {
        let goal = record.goal["description"].as_str().unwrap_or("");
        println!(
            "{}  {:<10} {}  {}",
            record.run_id,
            record.status.to_string(),
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            goal
        );
    }
    Ok(())
}

fn cmd_manifest(path: &Path) -> Result<()> {
    let registry = load_registry(path)?;
    info!(tools = registry.len(), "manifest is valid");
    for tool in registry.descriptors() {
        let caps: Vec<&str> = tool.capabilities.iter().map(String::as_str).collect();
        println!(
            "{:<20} {:<12} x{:<3} {}",
            tool.id,
            tool.risk.to_string(),
            tool.max_concurrency,
            caps.join(", ")
        );
    }
    Ok(())
}
