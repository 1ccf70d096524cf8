//! Storage trait definitions for Foreman runs
//!
//! One record per run holds the goal, the run status and the latest serialized
//! task forest. Beside it sits an append-only audit log of safety decisions,
//! tool invocations and forest transitions, keyed by the same run id.
//!
//! All traits are async and backend-agnostic. An in-memory fake lives in
//! `fakes`, a filesystem backend in `fs_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for an orchestration run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

/// Content digest (SHA-256 hex string) of a serialized forest snapshot.
///
/// The inner field is private so the string is always lowercase hex produced
/// by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the canonical JSON encoding of `value`.
    pub fn of_json(value: &serde_json::Value) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Lifecycle of a run.
///
/// `Accepted → Planning → Executing ⇄ Verifying → Completed | Failed | Cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Accepted,
    Planning,
    Executing,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The mutable part of a run record, replaced wholesale on every save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub status: RunStatus,
    /// Serialized task forest.
    pub forest: serde_json::Value,
    /// Deepest failure reason, when the run failed.
    pub failure: Option<serde_json::Value>,
}

/// Full run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    /// The accepted goal, serialized.
    pub goal: serde_json::Value,
    pub status: RunStatus,
    pub forest: serde_json::Value,
    pub forest_digest: Option<ContentDigest>,
    pub failure: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(run_id: RunId, goal: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            goal,
            status: RunStatus::Accepted,
            forest: serde_json::Value::Null,
            forest_digest: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a snapshot, refusing to touch a terminal record.
    pub fn apply(&mut self, snapshot: RunSnapshot) -> StorageResult<()> {
        if self.status.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: self.run_id.0.clone(),
                status: self.status.to_string(),
            });
        }
        self.forest_digest = Some(ContentDigest::of_json(&snapshot.forest)?);
        self.status = snapshot.status;
        self.forest = snapshot.forest;
        self.failure = snapshot.failure;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// A single audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic sequence number within the run
    pub seq: u64,
    /// Entry kind (e.g. "safety_decision", "tool_invocation", "node_transition")
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

/// Run persistence.
///
/// Guarantees:
/// - `append_audit` is append-only and rejects non-increasing `seq`.
/// - A terminal record (completed, failed, cancelled) is immutable.
/// - `get_audit` returns entries ordered by `seq`.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create the record for a freshly accepted run.
    async fn create_run(&self, run_id: &RunId, goal: serde_json::Value)
        -> StorageResult<RunRecord>;

    /// Replace the status, forest and failure of a non-terminal run.
    async fn save_snapshot(&self, run_id: &RunId, snapshot: RunSnapshot) -> StorageResult<()>;

    /// Append one audit entry.
    async fn append_audit(&self, run_id: &RunId, entry: AuditRecord) -> StorageResult<()>;

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    async fn get_audit(&self, run_id: &RunId) -> StorageResult<Vec<AuditRecord>>;

    /// All runs, oldest first.
    async fn list_runs(&self) -> StorageResult<Vec<RunRecord>>;
}
