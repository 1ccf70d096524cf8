//! Per-run audit trail.
//!
//! Append-only and totally ordered by `seq` (starting at 1). The orchestrator
//! periodically forwards new entries to the run store.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use foreman_state::AuditRecord;
use serde::{Deserialize, Serialize};

use crate::domain::{InvocationRecord, NodeId, NodeState};
use crate::safety::{SafetyDecision, SafetyVerdict};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    SafetyDecision {
        node_id: NodeId,
        invocation_id: String,
        tool_id: String,
        decision: SafetyDecision,
    },
    ApprovalRequested {
        node_id: NodeId,
        invocation_id: String,
        tool_id: String,
    },
    ApprovalResolved {
        node_id: NodeId,
        invocation_id: String,
        approved: bool,
        timed_out: bool,
    },
    ToolInvocation {
        node_id: NodeId,
        record: InvocationRecord,
    },
    NodeTransition {
        node_id: NodeId,
        from: NodeState,
        to: NodeState,
    },
    Replanned {
        failed: NodeId,
        corrective: Option<NodeId>,
        reason: String,
    },
    RunStatus {
        status: String,
    },
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SafetyDecision { .. } => "safety_decision",
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::ApprovalResolved { .. } => "approval_resolved",
            Self::ToolInvocation { .. } => "tool_invocation",
            Self::NodeTransition { .. } => "node_transition",
            Self::Replanned { .. } => "replanned",
            Self::RunStatus { .. } => "run_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn to_record(&self) -> Result<AuditRecord, serde_json::Error> {
        Ok(AuditRecord {
            seq: self.seq,
            kind: self.event.kind().to_string(),
            payload: serde_json::to_value(&self.event)?,
            timestamp: self.timestamp,
        })
    }
}

/// A denial as shown in run status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialRecord {
    pub seq: u64,
    pub node_id: NodeId,
    pub tool_id: String,
    pub rule_id: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return its sequence number.
    pub fn record(&self, event: AuditEvent) -> u64 {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let seq = entries.len() as u64 + 1;
        entries.push(AuditEntry {
            seq,
            timestamp: Utc::now(),
            event,
        });
        seq
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Entries with `seq > after`.
    pub fn since(&self, after: u64) -> Vec<AuditEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().skip(after as usize).cloned().collect()
    }

    /// Invocation records of tools that actually ran, optionally for one tool.
    pub fn invocations(&self, tool_id: Option<&str>) -> Vec<InvocationRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|entry| match &entry.event {
                AuditEvent::ToolInvocation { record, .. }
                    if tool_id.map_or(true, |t| t == record.tool_id) =>
                {
                    Some(record.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn denials(&self) -> Vec<DenialRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|entry| match &entry.event {
                AuditEvent::SafetyDecision {
                    node_id,
                    tool_id,
                    decision,
                    ..
                } if decision.verdict == SafetyVerdict::Deny => Some(DenialRecord {
                    seq: entry.seq,
                    node_id: *node_id,
                    tool_id: tool_id.clone(),
                    rule_id: decision.rule_id.clone(),
                    reason: decision.reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}
