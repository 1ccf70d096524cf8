//! Foreman State: run persistence
//!
//! One record per run (goal, status, serialized task forest, failure) plus an
//! append-only audit log of safety decisions and tool invocations, both keyed
//! by run id.
//!
//! ## Key Components
//!
//! - `RunStore`: async persistence trait
//! - `MemoryRunStore`: in-memory fake for tests and ephemeral runs
//! - `FsRunStore`: one directory per run, atomic record writes, JSONL audit

mod error;
pub mod fakes;
pub mod fs_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fakes::MemoryRunStore;
pub use fs_store::FsRunStore;
pub use storage_traits::{
    AuditRecord, ContentDigest, RunId, RunRecord, RunSnapshot, RunStatus, RunStore,
    StorageResult,
};
