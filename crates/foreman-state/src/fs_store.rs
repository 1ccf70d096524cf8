//! Filesystem-backed run store.
//!
//! Layout:
//!
//! ```text
//! <root>/runs/<run_id>/record.json   latest RunRecord, replaced atomically
//! <root>/runs/<run_id>/audit.jsonl   append-only, one AuditRecord per line
//! ```

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

const RECORD_FILE: &str = "record.json";
const AUDIT_FILE: &str = "audit.jsonl";

/// Run store persisting one directory per run under `<root>/runs/`.
///
/// File access runs on tokio's blocking pool; the async methods never touch
/// the filesystem on a runtime worker.
pub struct FsRunStore {
    inner: Arc<FsInner>,
}

struct FsInner {
    runs_dir: PathBuf,
    /// Last appended audit seq per run; serializes writers within the process.
    last_seq: Mutex<HashMap<String, u64>>,
}

impl FsRunStore {
    /// Create a store rooted at `root`. Creates `root/runs/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let runs_dir = root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self {
            inner: Arc::new(FsInner {
                runs_dir,
                last_seq: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Directory holding one subdirectory per run.
    pub fn runs_dir(&self) -> &Path {
        &self.inner.runs_dir
    }

    async fn blocking<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&FsInner) -> StorageResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

impl FsInner {
    fn record_exists(&self, run_id: &RunId) -> bool {
        self.run_dir(run_id).join(RECORD_FILE).exists()
    }

    fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir.join(&run_id.0)
    }

    fn read_record(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let path = self.run_dir(run_id).join(RECORD_FILE);
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::RunNotFound {
                    run_id: run_id.0.clone(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Atomic write: temp file in the same directory, then rename.
    fn write_record(&self, record: &RunRecord) -> StorageResult<()> {
        let dir = self.run_dir(&record.run_id);
        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, record)?;
        tmp.write_all(b"\n")?;
        tmp.persist(dir.join(RECORD_FILE)).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_audit(&self, run_id: &RunId) -> StorageResult<Vec<AuditRecord>> {
        let path = self.run_dir(run_id).join(AUDIT_FILE);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    fn create_run(&self, run_id: &RunId, goal: serde_json::Value) -> StorageResult<RunRecord> {
        let dir = self.run_dir(run_id);
        if self.record_exists(run_id) {
            return Err(StorageError::DuplicateRun {
                run_id: run_id.0.clone(),
            });
        }
        fs::create_dir_all(&dir)?;
        let record = RunRecord::new(run_id.clone(), goal);
        self.write_record(&record)?;
        debug!(run_id = %run_id, dir = %dir.display(), "run record created");
        Ok(record)
    }

    fn save_snapshot(&self, run_id: &RunId, snapshot: RunSnapshot) -> StorageResult<()> {
        let mut record = self.read_record(run_id)?;
        record.apply(snapshot)?;
        self.write_record(&record)
    }

    fn append_audit(&self, run_id: &RunId, entry: AuditRecord) -> StorageResult<()> {
        if !self.record_exists(run_id) {
            return Err(StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            });
        }

        let mut last_seq = self.last_seq.lock().unwrap_or_else(|e| e.into_inner());
        let last = match last_seq.get(&run_id.0) {
            Some(seq) => Some(*seq),
            None => self.read_audit(run_id)?.last().map(|e| e.seq),
        };
        if let Some(last) = last {
            if entry.seq <= last {
                return Err(StorageError::OutOfOrderAudit {
                    run_id: run_id.0.clone(),
                    seq: entry.seq,
                    last,
                });
            }
        }

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_dir(run_id).join(AUDIT_FILE))?;
        file.write_all(&line)?;
        last_seq.insert(run_id.0.clone(), entry.seq);
        Ok(())
    }

    fn get_audit(&self, run_id: &RunId) -> StorageResult<Vec<AuditRecord>> {
        if !self.record_exists(run_id) {
            return Err(StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            });
        }
        self.read_audit(run_id)
    }

    fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.runs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let run_id = RunId(entry.file_name().to_string_lossy().into_owned());
            match self.read_record(&run_id) {
                Ok(record) => records.push(record),
                Err(StorageError::RunNotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}

#[async_trait]
impl RunStore for FsRunStore {
    async fn create_run(
        &self,
        run_id: &RunId,
        goal: serde_json::Value,
    ) -> StorageResult<RunRecord> {
        let run_id = run_id.clone();
        self.blocking(move |store| store.create_run(&run_id, goal)).await
    }

    async fn save_snapshot(&self, run_id: &RunId, snapshot: RunSnapshot) -> StorageResult<()> {
        let run_id = run_id.clone();
        self.blocking(move |store| store.save_snapshot(&run_id, snapshot)).await
    }

    async fn append_audit(&self, run_id: &RunId, entry: AuditRecord) -> StorageResult<()> {
        let run_id = run_id.clone();
        self.blocking(move |store| store.append_audit(&run_id, entry)).await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let run_id = run_id.clone();
        self.blocking(move |store| store.read_record(&run_id)).await
    }

    async fn get_audit(&self, run_id: &RunId) -> StorageResult<Vec<AuditRecord>> {
        let run_id = run_id.clone();
        self.blocking(move |store| store.get_audit(&run_id)).await
    }

    async fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        self.blocking(FsInner::list_runs).await
    }
}
