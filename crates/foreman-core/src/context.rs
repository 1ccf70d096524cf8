//! Execution context manager.
//!
//! Each tool invocation runs inside an isolated context: a private working
//! directory plus resource quotas. Contexts are handed out as [`ContextLease`]s
//! which release on drop, so no code path (cancellation, panic, abort) can leak
//! one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::metrics::METRICS;

/// Outbound network policy for a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "hosts", rename_all = "snake_case")]
pub enum NetworkPolicy {
    Deny,
    Allow,
    AllowHosts(Vec<String>),
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deny => write!(f, "deny"),
            Self::Allow => write!(f, "allow"),
            Self::AllowHosts(hosts) => write!(f, "allow:{}", hosts.join(",")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextQuota {
    pub cpu_time_ms: u64,
    pub wall_clock_ms: u64,
    pub network: NetworkPolicy,
}

impl Default for ContextQuota {
    fn default() -> Self {
        Self {
            cpu_time_ms: 30_000,
            wall_clock_ms: 60_000,
            network: NetworkPolicy::Deny,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Upper bound on simultaneously live contexts.
    pub max_live: usize,
    /// Parent directory for context workdirs; the system temp dir when unset.
    pub root_dir: Option<PathBuf>,
    pub quota: ContextQuota,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_live: 64,
            root_dir: None,
            quota: ContextQuota::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Provisioning,
    Active,
    Draining,
    Destroyed,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("context capacity exhausted ({max_live} live)")]
    Capacity { max_live: usize },

    #[error("failed to provision workdir: {0}")]
    Provision(#[from] std::io::Error),
}

/// What a tool sees of its context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionContext {
    pub id: String,
    pub session_id: String,
    pub workdir: PathBuf,
    pub quota: ContextQuota,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ManagerInner {
    config: ContextConfig,
    states: Mutex<HashMap<String, ContextState>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl ManagerInner {
    fn set_state(&self, id: &str, state: ContextState) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if state == ContextState::Destroyed {
            states.remove(id);
        } else {
            states.insert(id.to_string(), state);
        }
    }
}

/// Owner of all live contexts. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ContextManager {
    inner: Arc<ManagerInner>,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                states: Mutex::new(HashMap::new()),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Provision a fresh context for `session_id`.
    pub fn acquire(&self, session_id: &str) -> Result<ContextLease, ContextError> {
        let id = uuid::Uuid::new_v4().to_string();
        {
            let mut states = self.inner.states.lock().unwrap_or_else(|e| e.into_inner());
            if states.len() >= self.inner.config.max_live {
                return Err(ContextError::Capacity {
                    max_live: self.inner.config.max_live,
                });
            }
            states.insert(id.clone(), ContextState::Provisioning);
        }

        let dir = match &self.inner.config.root_dir {
            Some(root) => std::fs::create_dir_all(root).and_then(|_| {
                tempfile::Builder::new().prefix("foreman-ctx-").tempdir_in(root)
            }),
            None => tempfile::Builder::new().prefix("foreman-ctx-").tempdir(),
        };
        let dir = match dir {
            Ok(dir) => dir,
            Err(e) => {
                self.inner.set_state(&id, ContextState::Destroyed);
                return Err(ContextError::Provision(e));
            }
        };

        let context = ExecutionContext {
            id: id.clone(),
            session_id: session_id.to_string(),
            workdir: dir.path().to_path_buf(),
            quota: self.inner.config.quota.clone(),
            created_at: Utc::now(),
        };
        self.inner.set_state(&id, ContextState::Active);
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);
        METRICS.inc_contexts_acquired();
        debug!(context_id = %id, session_id, "context acquired");

        Ok(ContextLease {
            context,
            dir: Some(dir),
            manager: Arc::clone(&self.inner),
        })
    }

    /// Release a lease explicitly. Equivalent to dropping it.
    pub fn release(&self, lease: ContextLease) {
        drop(lease);
    }

    pub fn live_count(&self) -> usize {
        self.inner
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn acquired_total(&self) -> u64 {
        self.inner.acquired.load(Ordering::Relaxed)
    }

    pub fn released_total(&self) -> u64 {
        self.inner.released.load(Ordering::Relaxed)
    }

    /// Lifecycle state of a context; `Destroyed` once it is gone.
    pub fn state_of(&self, context_id: &str) -> ContextState {
        self.inner
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(context_id)
            .copied()
            .unwrap_or(ContextState::Destroyed)
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }
}

/// Exclusive handle on a live context.
#[derive(Debug)]
pub struct ContextLease {
    context: ExecutionContext,
    dir: Option<TempDir>,
    manager: Arc<ManagerInner>,
}

impl ContextLease {
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn id(&self) -> &str {
        &self.context.id
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        self.manager
            .set_state(&self.context.id, ContextState::Draining);
        if let Err(e) = dir.close() {
            warn!(context_id = %self.context.id, error = %e, "failed to remove context workdir");
        }
        self.manager
            .set_state(&self.context.id, ContextState::Destroyed);
        self.manager.released.fetch_add(1, Ordering::Relaxed);
        debug!(context_id = %self.context.id, "context released");
    }
}
