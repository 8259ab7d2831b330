//! The persisted job record and its state machine.
//!
//! ```text
//!            start()            succeed()
//!  queued ──────────▶ running ──────────▶ succeeded
//!    │                   │
//!    │      fail()       │  fail()
//!    └──────────────────▶└──────────▶ failed
//! ```
//!
//! Transition methods are the only way the orchestrator mutates a record, so
//! every timestamp is set exactly once and terminal states are never left.

use crate::error::TransitionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// `succeeded` and `failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the raw upload.
    pub checksum: String,
    pub status: JobStatus,
    /// 0–100.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub input_uri: String,
    pub output_uri: Option<String>,
    /// One-way digest of the capability token. Records written by the
    /// previous service used the `access_token_hash` key.
    #[serde(default, alias = "access_token_hash")]
    pub access_token_digest: Option<String>,
}

/// Attributes of an ingested upload needed to create a record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub input_uri: String,
    pub access_token_digest: String,
}

impl JobRecord {
    /// Create a `queued` record.
    pub fn new(job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: job.id,
            filename: job.filename,
            content_type: job.content_type,
            size_bytes: job.size_bytes,
            checksum: job.checksum,
            status: JobStatus::Queued,
            progress: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
            input_uri: job.input_uri,
            output_uri: None,
            access_token_digest: Some(job.access_token_digest),
        }
    }

    /// `queued → running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure(JobStatus::Queued, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `running → succeeded`, recording where the Markdown was written.
    pub fn succeed(
        &mut self,
        output_uri: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure(JobStatus::Running, JobStatus::Succeeded)?;
        self.status = JobStatus::Succeeded;
        self.progress = 100;
        self.output_uri = Some(output_uri.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `queued|running → failed`. Progress keeps its last known value.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.rejected(JobStatus::Failed));
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.failed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn ensure(&self, from: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status == from {
            Ok(())
        } else {
            Err(self.rejected(to))
        }
    }

    fn rejected(&self, to: JobStatus) -> TransitionError {
        TransitionError {
            id: self.id.clone(),
            from: self.status,
            to,
        }
    }

    /// Check the status/outcome invariant and the timestamp bookkeeping.
    pub fn is_consistent(&self) -> bool {
        if self.progress > 100 {
            return false;
        }
        match self.status {
            JobStatus::Queued => {
                self.output_uri.is_none()
                    && self.error.is_none()
                    && self.started_at.is_none()
                    && self.completed_at.is_none()
                    && self.failed_at.is_none()
            }
            JobStatus::Running => {
                self.output_uri.is_none()
                    && self.error.is_none()
                    && self.started_at.is_some()
                    && self.completed_at.is_none()
                    && self.failed_at.is_none()
            }
            JobStatus::Succeeded => {
                self.output_uri.is_some()
                    && self.error.is_none()
                    && self.progress == 100
                    && self.completed_at.is_some()
                    && self.failed_at.is_none()
            }
            JobStatus::Failed => {
                self.output_uri.is_none() && self.error.is_some() && self.failed_at.is_some()
            }
        }
    }

    /// Client-facing projection without the token digest.
    pub fn view(&self) -> JobView {
        JobView::from(self)
    }
}

/// Everything a client may see about a job: the record minus its digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub input_uri: String,
    pub output_uri: Option<String>,
}

impl From<&JobRecord> for JobView {
    fn from(r: &JobRecord) -> Self {
        Self {
            id: r.id.clone(),
            filename: r.filename.clone(),
            content_type: r.content_type.clone(),
            size_bytes: r.size_bytes,
            checksum: r.checksum.clone(),
            status: r.status,
            progress: r.progress,
            created_at: r.created_at,
            updated_at: r.updated_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            failed_at: r.failed_at,
            error: r.error.clone(),
            input_uri: r.input_uri.clone(),
            output_uri: r.output_uri.clone(),
        }
    }
}
