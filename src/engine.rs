//! The job engine: one explicit instance owning config, store, converter,
//! queue and workers.
//!
//! ## Lifecycle
//!
//! ```text
//! DocJobEngine::new / ::open
//!        │
//!   start()  ── recover records left behind by a previous process
//!        │     ── spawn `config.workers` workers
//!        ▼
//!   submit() / status() / result()   (any number of concurrent callers)
//!        │
//!   stop()   ── in-flight jobs finish, queued ids stay unread
//! ```
//!
//! ## Recovery
//!
//! A process that dies mid-job leaves its record `running` with nobody
//! working on it. On `start` such records are marked `failed`; records still
//! `queued` are put back on the queue, oldest first. Ids submitted before
//! `start` are already waiting in the queue and are not added again.
//!
//! `start` runs once per engine; a second call fails before touching any
//! record, so jobs in flight are never mistaken for interrupted ones.

use crate::config::EngineConfig;
use crate::convert::Converter;
use crate::dispatch::Dispatcher;
use crate::error::DocJobError;
use crate::guard::AccessGuard;
use crate::ingest::UploadIngestor;
use crate::media::MediaPolicy;
use crate::orchestrator::ConversionOrchestrator;
use crate::record::{JobRecord, JobStatus, JobView, NewJob};
use crate::store::{FsJobStore, JobStore};
use crate::token::{CapabilityToken, TokenCodec};
use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};
use uuid::Uuid;

const INTERRUPTED: &str = "interrupted before completion";

/// A freshly accepted job and the only copy of its capability token.
#[derive(Debug)]
pub struct Submission {
    pub job: JobView,
    pub token: CapabilityToken,
}

/// What [`DocJobEngine::start`] found on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `queued` records put back on the queue.
    pub requeued: usize,
    /// `running` records marked `failed`.
    pub interrupted: usize,
}

/// Accepts uploads, runs conversions in the background, serves results.
pub struct DocJobEngine<S, C> {
    config: EngineConfig,
    store: Arc<S>,
    orchestrator: ConversionOrchestrator<S, C>,
    dispatcher: Dispatcher,
    ingestor: UploadIngestor,
    media: MediaPolicy,
    codec: TokenCodec,
    guard: AccessGuard,
    started: AtomicBool,
}

impl<C: Converter> DocJobEngine<FsJobStore, C> {
    /// Engine backed by the filesystem store under `config.jobs_dir()`.
    pub fn open(config: EngineConfig, converter: C) -> Result<Self, DocJobError> {
        let store = FsJobStore::new(config.jobs_dir());
        store.ensure_root()?;
        Ok(Self::new(config, store, converter))
    }
}

impl<S: JobStore, C: Converter> DocJobEngine<S, C> {
    pub fn new(config: EngineConfig, store: S, converter: C) -> Self {
        let store = Arc::new(store);
        let orchestrator = ConversionOrchestrator::new(
            Arc::clone(&store),
            Arc::new(converter),
            config.job_timeout(),
        );
        let codec = TokenCodec::new();
        Self {
            ingestor: UploadIngestor::new(config.chunk_size),
            media: MediaPolicy::from_config(&config),
            dispatcher: Dispatcher::new(),
            guard: AccessGuard::new(codec),
            codec,
            started: AtomicBool::new(false),
            orchestrator,
            store,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ids waiting for or undergoing processing.
    pub fn pending_jobs(&self) -> usize {
        self.dispatcher.pending()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Recover leftover records, then start the worker pool.
    ///
    /// # Errors
    /// [`DocJobError::ShuttingDown`] after [`DocJobEngine::stop`],
    /// [`DocJobError::Internal`] when the engine was already started.
    pub async fn start(&self) -> Result<RecoveryReport, DocJobError> {
        if self.dispatcher.is_stopped() {
            return Err(DocJobError::ShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DocJobError::Internal("engine already started".into()));
        }
        let report = match self.recover().await {
            Ok(report) => report,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let orchestrator = self.orchestrator.clone();
        self.dispatcher.start(self.config.workers, move |job_id: String| {
            let orchestrator = orchestrator.clone();
            async move {
                // Failures are already recorded on the job and logged.
                let _ = orchestrator.process(&job_id).await;
            }
        })?;
        info!(
            "Engine started: {} workers, {} jobs requeued, {} marked interrupted",
            self.config.workers, report.requeued, report.interrupted
        );
        Ok(report)
    }

    /// Stop the workers after their current job. New submissions are refused.
    pub async fn stop(&self) {
        self.dispatcher.stop().await;
    }

    /// Wait until every accepted job has been processed.
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await;
    }

    async fn recover(&self) -> Result<RecoveryReport, DocJobError> {
        let store = Arc::clone(&self.store);
        let records = blocking(move || -> Result<Vec<JobRecord>, DocJobError> {
            let mut records = Vec::new();
            for id in store.list_ids()? {
                match store.load(&id) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(e) => warn!(job_id = %id, "Skipping unreadable record: {}", e),
                }
            }
            Ok(records)
        })
        .await??;

        let mut report = RecoveryReport::default();
        let mut queued = Vec::new();
        for mut record in records {
            match record.status {
                JobStatus::Queued => queued.push(record),
                JobStatus::Running => {
                    record.fail(INTERRUPTED, Utc::now()).map_err(|e| {
                        DocJobError::Internal(e.to_string())
                    })?;
                    self.save(record).await?;
                    report.interrupted += 1;
                }
                JobStatus::Succeeded | JobStatus::Failed => {}
            }
        }
        queued.sort_by_key(|r| r.created_at);
        for record in queued {
            if self.dispatcher.enqueue(record.id)? {
                report.requeued += 1;
            }
        }
        Ok(report)
    }

    // ── Operations ───────────────────────────────────────────────────────

    /// Accept an upload: store it, persist a `queued` record, enqueue it.
    ///
    /// The returned token is the only credential for the job and is not
    /// stored anywhere.
    ///
    /// # Errors
    /// - [`DocJobError::UnsupportedMediaType`] before anything is stored.
    /// - [`DocJobError::UploadTooLarge`] once the stream passes the limit.
    /// - [`DocJobError::ShuttingDown`] after [`DocJobEngine::stop`].
    ///
    /// On any error the job directory is removed, so no record survives.
    pub async fn submit<R>(
        &self,
        reader: R,
        filename: &str,
        content_type: &str,
    ) -> Result<Submission, DocJobError>
    where
        R: AsyncRead + Unpin + Send,
    {
        if self.dispatcher.is_stopped() {
            return Err(DocJobError::ShuttingDown);
        }
        self.media.check(content_type, filename)?;

        let id = Uuid::new_v4().to_string();
        let token = self.codec.issue();
        let job_dir = self.store.job_dir(&id);

        match self
            .accept(&id, &job_dir, reader, filename, content_type, &token)
            .await
        {
            Ok(record) => {
                info!(
                    job_id = %id,
                    "Job accepted: {} ({} bytes, {})",
                    record.filename, record.size_bytes, record.content_type
                );
                Ok(Submission {
                    job: record.view(),
                    token,
                })
            }
            Err(e) => {
                debug!(job_id = %id, "Submission rejected: {}", e);
                discard_job_dir(&job_dir).await;
                Err(e)
            }
        }
    }

    async fn accept<R>(
        &self,
        id: &str,
        job_dir: &Path,
        reader: R,
        filename: &str,
        content_type: &str,
        token: &CapabilityToken,
    ) -> Result<JobRecord, DocJobError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let upload = self
            .ingestor
            .ingest(
                reader,
                &job_dir.join("input"),
                filename,
                content_type,
                self.config.max_upload_bytes,
            )
            .await?;

        let filename = if filename.trim().is_empty() {
            "upload"
        } else {
            filename
        };
        let record = JobRecord::new(
            NewJob {
                id: id.to_string(),
                filename: filename.to_string(),
                content_type: upload.content_type,
                size_bytes: upload.size_bytes,
                checksum: upload.checksum,
                input_uri: upload.path.display().to_string(),
                access_token_digest: self.codec.digest(token),
            },
            Utc::now(),
        );
        self.save(record.clone()).await?;
        self.dispatcher.enqueue(id)?;
        Ok(record)
    }

    /// The client view of a job.
    ///
    /// # Errors
    /// `Unauthorized` (malformed token), `JobNotFound`, `NotReady` (no
    /// digest on the record) or `Forbidden` (token mismatch), in that order.
    pub async fn status(&self, job_id: &str, token: &str) -> Result<JobView, DocJobError> {
        let record = self.authorized(job_id, token).await?;
        Ok(record.view())
    }

    /// The converted Markdown, once the job has succeeded.
    ///
    /// # Errors
    /// The same access errors as [`DocJobEngine::status`], then `NotReady`
    /// unless the job succeeded and its result file is present.
    pub async fn result(&self, job_id: &str, token: &str) -> Result<String, DocJobError> {
        let record = self.authorized(job_id, token).await?;
        let not_ready = || DocJobError::NotReady {
            id: record.id.clone(),
            detail: "result not available",
        };
        if record.status != JobStatus::Succeeded {
            return Err(not_ready());
        }
        let Some(output) = record.output_uri.as_deref() else {
            return Err(not_ready());
        };
        match tokio::fs::read_to_string(output).await {
            Ok(markdown) => Ok(markdown),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_ready()),
            Err(e) => Err(DocJobError::Io {
                path: output.into(),
                source: e,
            }),
        }
    }

    /// Load a record without any token check. For trusted callers only.
    pub async fn load_job(&self, job_id: &str) -> Result<Option<JobRecord>, DocJobError> {
        let store = Arc::clone(&self.store);
        let id = job_id.to_string();
        Ok(blocking(move || store.load(&id)).await??)
    }

    async fn authorized(&self, job_id: &str, token: &str) -> Result<JobRecord, DocJobError> {
        if !self.codec.is_well_formed(token) {
            return Err(DocJobError::Unauthorized {
                reason: "malformed token",
            });
        }
        let record = self
            .load_job(job_id)
            .await?
            .ok_or_else(|| DocJobError::JobNotFound {
                id: job_id.to_string(),
            })?;
        self.guard.check(&record, token)?;
        Ok(record)
    }

    async fn save(&self, record: JobRecord) -> Result<(), DocJobError> {
        let store = Arc::clone(&self.store);
        Ok(blocking(move || store.save(&record)).await??)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, DocJobError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DocJobError::Internal(format!("blocking task failed: {e}")))
}

async fn discard_job_dir(job_dir: &Path) {
    match tokio::fs::remove_dir_all(job_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", job_dir.display(), e),
    }
}
