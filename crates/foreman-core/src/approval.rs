//! Human approval for `confirm` verdicts.
//!
//! The gateway registers a request and waits on a oneshot receiver; the
//! service resolves it when an [`ApprovalResponse`] arrives. In the auto
//! modes the receiver resolves immediately.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use foreman_state::RunId;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Wait for an explicit response.
    #[default]
    Manual,
    AutoApprove,
    AutoDeny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub run_id: RunId,
    pub invocation_id: String,
    pub tool_id: String,
    pub capability: String,
    pub rule_id: String,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub run_id: RunId,
    pub invocation_id: String,
    pub approved: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("no pending approval for run {run_id} invocation {invocation_id}")]
    NotPending {
        run_id: String,
        invocation_id: String,
    },
}

type PendingKey = (RunId, String);

#[derive(Debug, Default)]
pub struct ApprovalBroker {
    mode: ApprovalMode,
    pending: Mutex<HashMap<PendingKey, (ApprovalRequest, oneshot::Sender<bool>)>>,
}

impl ApprovalBroker {
    pub fn new(mode: ApprovalMode) -> Self {
        Self {
            mode,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Register a request; the receiver yields the decision.
    pub fn request(&self, request: ApprovalRequest) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        match self.mode {
            ApprovalMode::AutoApprove | ApprovalMode::AutoDeny => {
                let approved = self.mode == ApprovalMode::AutoApprove;
                info!(
                    run_id = %request.run_id,
                    invocation_id = %request.invocation_id,
                    approved,
                    "approval resolved automatically"
                );
                let _ = tx.send(approved);
            }
            ApprovalMode::Manual => {
                info!(
                    run_id = %request.run_id,
                    invocation_id = %request.invocation_id,
                    tool_id = %request.tool_id,
                    "approval requested"
                );
                let key = (request.run_id.clone(), request.invocation_id.clone());
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key, (request, tx));
            }
        }
        rx
    }

    pub fn resolve(&self, response: ApprovalResponse) -> Result<(), ApprovalError> {
        let key = (response.run_id.clone(), response.invocation_id.clone());
        let entry = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
        match entry {
            Some((_, tx)) => {
                // The waiter may have timed out in the meantime; nothing to do then.
                let _ = tx.send(response.approved);
                Ok(())
            }
            None => Err(ApprovalError::NotPending {
                run_id: response.run_id.0,
                invocation_id: response.invocation_id,
            }),
        }
    }

    /// Drop a pending request (timed out or cancelled).
    pub fn withdraw(&self, run_id: &RunId, invocation_id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(run_id.clone(), invocation_id.to_string()));
    }

    /// Outstanding requests for a run, oldest first.
    pub fn pending_for(&self, run_id: &RunId) -> Vec<ApprovalRequest> {
        let mut out: Vec<ApprovalRequest> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|(req, _)| req.run_id == *run_id)
            .map(|(req, _)| req.clone())
            .collect();
        out.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        out
    }
}
