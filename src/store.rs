//! Job record persistence.
//!
//! [`JobStore`] is the contract the engine needs: load/save a record by id
//! and enumerate ids for startup recovery. [`FsJobStore`] keeps one pretty
//! JSON file per job at `<data_dir>/jobs/<id>/job.json`.
//!
//! ## Atomicity
//!
//! Status polling reads records while workers rewrite them. Writes therefore
//! go to a temporary file in the same directory which is then renamed over
//! `job.json`; a reader sees either the old record or the new one, never a
//! torn write.
//!
//! The trait is synchronous. The engine calls it through
//! `tokio::task::spawn_blocking`, so implementations may block freely.

use crate::error::StoreError;
use crate::record::JobRecord;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

const RECORD_FILE: &str = "job.json";

/// Load/save access to job records keyed by id.
pub trait JobStore: Send + Sync + 'static {
    /// Directory owned by the job (upload, result, record).
    fn job_dir(&self, job_id: &str) -> PathBuf;

    /// Load a record; `Ok(None)` when no such job exists.
    fn load(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Persist a record atomically, replacing any previous version.
    fn save(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Ids of every stored record.
    fn list_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// Filesystem-backed [`JobStore`].
#[derive(Debug, Clone)]
pub struct FsJobStore {
    jobs_dir: PathBuf,
}

impl FsJobStore {
    /// Store rooted at `jobs_dir` (normally `EngineConfig::jobs_dir()`).
    pub fn new(jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
        }
    }

    /// Create the root directory if needed.
    pub fn ensure_root(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.jobs_dir).map_err(|e| io(&self.jobs_dir, e))
    }

    pub fn root(&self) -> &Path {
        &self.jobs_dir
    }

    fn record_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(RECORD_FILE)
    }
}

impl JobStore for FsJobStore {
    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(job_id)
    }

    fn load(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        if !is_safe_id(job_id) {
            return Ok(None);
        }
        let path = self.record_path(job_id);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path, source })
    }

    fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let dir = self.job_dir(&record.id);
        std::fs::create_dir_all(&dir).map_err(|e| io(&dir, e))?;
        let json = serde_json::to_vec_pretty(record).map_err(StoreError::Serialize)?;

        let path = dir.join(RECORD_FILE);
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| io(&dir, e))?;
        tmp.write_all(&json).map_err(|e| io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| io(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| io(&path, e.error))?;

        debug!("Saved job {} ({})", record.id, record.status);
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.jobs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io(&self.jobs_dir, e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io(&self.jobs_dir, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_safe_id(&name) && entry.path().join(RECORD_FILE).is_file() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Ids come from request paths; only plain `[A-Za-z0-9-]` names touch the disk.
fn is_safe_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= 64
        && job_id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn io(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
