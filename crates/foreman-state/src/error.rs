//! Error types for foreman-state

use thiserror::Error;

/// Errors produced by run stores.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record exists for the run
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// A record already exists for the run
    #[error("run already exists: {run_id}")]
    DuplicateRun { run_id: String },

    /// The run is terminal and its record is frozen
    #[error("run {run_id} is {status}, expected a non-terminal run")]
    InvalidRunState { run_id: String, status: String },

    /// Audit sequence numbers must be strictly increasing
    #[error("audit seq {seq} for run {run_id} is not after {last}")]
    OutOfOrderAudit { run_id: String, seq: u64, last: u64 },

    /// Digest string is not 64 hex chars
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking filesystem task panicked or was cancelled
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::RunNotFound {
            run_id: "abc".into(),
        };
        assert!(err.to_string().contains("run not found: abc"));

        let err = StorageError::OutOfOrderAudit {
            run_id: "r".into(),
            seq: 3,
            last: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("seq 3"));
        assert!(msg.contains("after 5"));
    }
}
