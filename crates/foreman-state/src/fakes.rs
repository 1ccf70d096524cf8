//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryRunStore` satisfies the `RunStore` contract without touching disk.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    audit: Vec<AuditRecord>,
}

/// In-memory run store backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_run<T>(
        &self,
        run_id: &RunId,
        f: impl FnOnce(&mut RunState) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let state = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        f(state)
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(
        &self,
        run_id: &RunId,
        goal: serde_json::Value,
    ) -> StorageResult<RunRecord> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if runs.contains_key(&run_id.0) {
            return Err(StorageError::DuplicateRun {
                run_id: run_id.0.clone(),
            });
        }
        let record = RunRecord::new(run_id.clone(), goal);
        runs.insert(
            run_id.0.clone(),
            RunState {
                record: record.clone(),
                audit: Vec::new(),
            },
        );
        Ok(record)
    }

    async fn save_snapshot(&self, run_id: &RunId, snapshot: RunSnapshot) -> StorageResult<()> {
        self.with_run(run_id, |state| state.record.apply(snapshot))
    }

    async fn append_audit(&self, run_id: &RunId, entry: AuditRecord) -> StorageResult<()> {
        self.with_run(run_id, |state| {
            if let Some(last) = state.audit.last() {
                if entry.seq <= last.seq {
                    return Err(StorageError::OutOfOrderAudit {
                        run_id: run_id.0.clone(),
                        seq: entry.seq,
                        last: last.seq,
                    });
                }
            }
            state.audit.push(entry);
            Ok(())
        })
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.with_run(run_id, |state| Ok(state.record.clone()))
    }

    async fn get_audit(&self, run_id: &RunId) -> StorageResult<Vec<AuditRecord>> {
        self.with_run(run_id, |state| Ok(state.audit.clone()))
    }

    async fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<RunRecord> = runs.values().map(|s| s.record.clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
