//! The service facade: goal submission, status, cancellation and approvals.
//!
//! One `ForemanService` owns the registry, context manager, approval broker
//! and run store shared by every run. Each submitted goal runs on its own
//! spawned task with its own [`RunContext`] (audit trail, circuit breaker,
//! cancellation token).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use foreman_state::{RunId, RunRecord, RunStore};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalBroker, ApprovalRequest, ApprovalResponse};
use crate::audit::AuditEntry;
use crate::config::ForemanConfig;
use crate::context::ContextManager;
use crate::domain::{ForemanError, Goal, GoalRequest, Result, TaskForest};
use crate::executor::Executor;
use crate::gateway::ToolGateway;
use crate::orchestrator::{Orchestrator, RunStatusReport};
use crate::planner::Planner;
use crate::registry::ToolRegistry;
use crate::run::RunContext;
use crate::safety::{PolicySet, SafetyInterlock};

struct RunHandle {
    /// Submission order, used to evict the oldest finished runs first.
    seq: u64,
    context: Arc<RunContext>,
    status: watch::Receiver<RunStatusReport>,
}

impl RunHandle {
    fn is_finished(&self) -> bool {
        self.status.borrow().is_terminal()
    }
}

/// Drop the oldest finished runs until at most `keep` remain.
fn evict_finished(runs: &mut HashMap<RunId, RunHandle>, keep: usize) {
    let mut finished: Vec<(u64, RunId)> = runs
        .iter()
        .filter(|(_, h)| h.is_finished())
        .map(|(id, h)| (h.seq, id.clone()))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, run_id) in finished.into_iter().take(excess) {
        runs.remove(&run_id);
        debug!(run_id = %run_id, "evicted finished run from memory");
    }
}

struct ServiceInner {
    config: ForemanConfig,
    registry: Arc<ToolRegistry>,
    policy: Arc<PolicySet>,
    approvals: Arc<ApprovalBroker>,
    contexts: ContextManager,
    store: Arc<dyn RunStore>,
    orchestrator: Arc<Orchestrator>,
    runs: Mutex<HashMap<RunId, RunHandle>>,
    next_seq: AtomicU64,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ForemanService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for ForemanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForemanService")
            .field("tools", &self.inner.registry.len())
            .field("orchestrator", &self.inner.orchestrator)
            .finish_non_exhaustive()
    }
}

impl ForemanService {
    pub fn new(
        config: ForemanConfig,
        registry: ToolRegistry,
        store: Arc<dyn RunStore>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(registry);
        let policy = Arc::new(config.safety.policy());
        let approvals = Arc::new(ApprovalBroker::new(config.safety.approval_mode));
        let contexts = ContextManager::new(config.contexts.clone());

        let gateway = Arc::new(ToolGateway::new(
            Arc::clone(&registry),
            Arc::clone(&approvals),
            config.gateway.clone(),
        ));
        let executor = Arc::new(Executor::new(
            gateway,
            contexts.clone(),
            config.executor.clone(),
        ));
        let planner = Arc::new(Planner::new(Arc::clone(&registry), config.planner.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            planner,
            executor,
            Arc::clone(&store),
            config.orchestrator.clone(),
        ));

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                registry,
                policy,
                approvals,
                contexts,
                store,
                orchestrator,
                runs: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &ForemanConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.inner.registry
    }

    /// Context accounting shared by all runs.
    pub fn contexts(&self) -> &ContextManager {
        &self.inner.contexts
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.inner.store
    }

    /// Accept a goal and start running it. Returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: GoalRequest) -> Result<RunId> {
        let goal = Goal::accept(request)
            .ok_or_else(|| ForemanError::InvalidGoal("description is empty".to_string()))?;
        let run_id = RunId::new();
        let interlock = SafetyInterlock::new(
            Arc::clone(&self.inner.policy),
            self.inner.config.safety.breaker.clone(),
            goal.constraints.clone(),
        );
        let context = Arc::new(RunContext::new(run_id.clone(), goal.clone(), interlock));
        let (tx, rx) = watch::channel(RunStatusReport::accepted(run_id.clone(), goal));

        {
            let mut runs = self.inner.runs.lock().unwrap_or_else(|e| e.into_inner());
            evict_finished(&mut runs, self.inner.config.orchestrator.retained_runs);
            runs.insert(
                run_id.clone(),
                RunHandle {
                    seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
                    context: Arc::clone(&context),
                    status: rx,
                },
            );
        }

        let orchestrator = Arc::clone(&self.inner.orchestrator);
        tokio::spawn(async move {
            orchestrator.run(context, tx).await;
        });
        info!(run_id = %run_id, "goal submitted");
        Ok(run_id)
    }

    /// Decompose a goal without running it.
    pub fn plan(&self, request: GoalRequest) -> Result<TaskForest> {
        let goal = Goal::accept(request)
            .ok_or_else(|| ForemanError::InvalidGoal("description is empty".to_string()))?;
        Ok(self.inner.orchestrator.planner().decompose(&goal)?)
    }

    fn with_handle<T>(&self, run_id: &RunId, f: impl FnOnce(&RunHandle) -> T) -> Result<T> {
        let runs = self.inner.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.get(run_id)
            .map(f)
            .ok_or_else(|| ForemanError::UnknownRun {
                run_id: run_id.to_string(),
            })
    }

    /// Latest status of a run started by this service.
    pub fn status(&self, run_id: &RunId) -> Result<RunStatusReport> {
        let mut report = self.with_handle(run_id, |h| h.status.borrow().clone())?;
        report.pending_approvals = self.inner.approvals.pending_for(run_id);
        Ok(report)
    }

    /// Status updates for a run, published after every forest mutation.
    pub fn subscribe(&self, run_id: &RunId) -> Result<watch::Receiver<RunStatusReport>> {
        self.with_handle(run_id, |h| h.status.clone())
    }

    /// Wait until the run reaches a terminal state.
    pub async fn wait(&self, run_id: &RunId) -> Result<RunStatusReport> {
        let mut rx = self.subscribe(run_id)?;
        if rx.wait_for(RunStatusReport::is_terminal).await.is_err() {
            // The run task is gone; report whatever it last published.
            warn!(run_id = %run_id, "run task ended without a terminal status");
        }
        let report = rx.borrow().clone();
        Ok(report)
    }

    /// Trigger the run's cancellation token.
    pub fn cancel(&self, run_id: &RunId) -> Result<()> {
        self.with_handle(run_id, |h| h.context.cancel.cancel())?;
        info!(run_id = %run_id, "cancellation requested");
        Ok(())
    }

    /// Resolve a pending `confirm` wait.
    pub fn approve(&self, response: ApprovalResponse) -> Result<()> {
        self.with_handle(&response.run_id, |_| ())?;
        self.inner.approvals.resolve(response)?;
        Ok(())
    }

    pub fn pending_approvals(&self, run_id: &RunId) -> Result<Vec<ApprovalRequest>> {
        self.with_handle(run_id, |_| ())?;
        Ok(self.inner.approvals.pending_for(run_id))
    }

    /// The in-memory audit trail of a run started by this service.
    pub fn audit(&self, run_id: &RunId) -> Result<Vec<AuditEntry>> {
        self.with_handle(run_id, |h| h.context.audit.entries())
    }

    /// Runs started by this service that are still held in memory: every
    /// unfinished run plus the most recent `orchestrator.retained_runs`
    /// finished ones. Evicted runs are only reachable through [`Self::record`].
    pub fn runs(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self
            .inner
            .runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// The persisted record of any run in the store, including runs from
    /// earlier processes.
    pub async fn record(&self, run_id: &RunId) -> Result<RunRecord> {
        Ok(self.inner.store.get_run(run_id).await?)
    }
}
