//! Per-job processing: `queued → running → succeeded | failed`.
//!
//! [`ConversionOrchestrator::process`] is what each dispatcher worker runs for
//! a dequeued id. It owns the record for the duration of the job and persists
//! it at every transition, so a status poll always sees the latest state.
//!
//! ## Claiming
//!
//! A job id may be delivered more than once. Before touching the record a
//! worker claims the id in a set shared by every clone of the orchestrator;
//! a second worker that finds the id claimed skips it. The claim is held
//! until the job reaches a terminal state, so the `queued → running` step is
//! taken by exactly one worker per process.
//!
//! ## Failure handling
//!
//! Anything that goes wrong after the record has been loaded becomes a
//! [`JobFailure`]. The orchestrator then reloads the record (the in-memory
//! copy may be stale or half-updated), marks it `failed` with the failure
//! text and saves it. If even that save fails the error is logged and
//! dropped: the worker must keep draining the queue.

use crate::convert::Converter;
use crate::error::{JobFailure, StoreError};
use crate::record::{JobRecord, JobStatus};
use crate::store::JobStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Relative location of the converted document inside a job directory.
pub const RESULT_FILE: &str = "output/result.md";

/// What happened to a dequeued id that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Markdown written to `output`, record marked `succeeded`.
    Succeeded { output: PathBuf },
    /// No record exists for the id.
    Missing,
    /// The record had already left `queued` (a second delivery).
    AlreadyHandled(JobStatus),
    /// Another worker of this process holds the job.
    Claimed,
}

type ClaimSet = Arc<Mutex<HashSet<String>>>;

/// Exclusive hold on one job id; released on drop.
struct Claim {
    id: String,
    active: ClaimSet,
}

impl Claim {
    fn acquire(active: &ClaimSet, id: &str) -> Option<Self> {
        if !active.lock().insert(id.to_string()) {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            active: Arc::clone(active),
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.active.lock().remove(&self.id);
    }
}

/// Drives one job through the state machine.
pub struct ConversionOrchestrator<S, C> {
    store: Arc<S>,
    converter: Arc<C>,
    job_timeout: Duration,
    active: ClaimSet,
}

impl<S, C> Clone for ConversionOrchestrator<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            converter: Arc::clone(&self.converter),
            job_timeout: self.job_timeout,
            active: Arc::clone(&self.active),
        }
    }
}

impl<S: JobStore, C: Converter> ConversionOrchestrator<S, C> {
    pub fn new(store: Arc<S>, converter: Arc<C>, job_timeout: Duration) -> Self {
        Self {
            store,
            converter,
            job_timeout,
            active: ClaimSet::default(),
        }
    }

    /// Run the job `job_id` to a terminal state.
    ///
    /// `Err` means the job was marked `failed` (best effort) or its record
    /// could not be read at all. Either way the caller just moves on.
    pub async fn process(&self, job_id: &str) -> Result<JobOutcome, JobFailure> {
        let Some(_claim) = Claim::acquire(&self.active, job_id) else {
            debug!(job_id = %job_id, "Job claimed by another worker, skipping");
            return Ok(JobOutcome::Claimed);
        };
        let record = match self.load(job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(job_id = %job_id, "No record for dequeued job, skipping");
                return Ok(JobOutcome::Missing);
            }
            Err(e) => {
                warn!(job_id = %job_id, "Cannot load job record: {}", e);
                return Err(e);
            }
        };
        if record.status != JobStatus::Queued {
            debug!(job_id = %job_id, status = %record.status, "Job already handled, skipping");
            return Ok(JobOutcome::AlreadyHandled(record.status));
        }

        let started = Instant::now();
        let result = self.run(record).await;
        let elapsed = started.elapsed();
        if elapsed > self.job_timeout {
            warn!(
                job_id = %job_id,
                "Job ran for {:.1}s, over the {}s timeout",
                elapsed.as_secs_f64(),
                self.job_timeout.as_secs()
            );
        }

        match result {
            Ok(output) => {
                info!(job_id = %job_id, "Job succeeded in {}ms", elapsed.as_millis());
                Ok(JobOutcome::Succeeded { output })
            }
            Err(failure) => {
                warn!(job_id = %job_id, "Job failed: {}", failure);
                self.record_failure(job_id, &failure).await;
                Err(failure)
            }
        }
    }

    async fn run(&self, mut record: JobRecord) -> Result<PathBuf, JobFailure> {
        record.start(Utc::now())?;
        self.save(&record).await?;
        debug!(job_id = %record.id, "Job running");

        let input = PathBuf::from(&record.input_uri);
        let converter = Arc::clone(&self.converter);
        let markdown = tokio::task::spawn_blocking(move || converter.convert(&input))
            .await
            .map_err(|e| JobFailure::Crashed(e.to_string()))??;

        let output = self.store.job_dir(&record.id).join(RESULT_FILE);
        write_result(&output, &markdown).await?;

        record.succeed(output.display().to_string(), Utc::now())?;
        self.save(&record).await?;
        Ok(output)
    }

    async fn record_failure(&self, job_id: &str, failure: &JobFailure) {
        let mut fresh = match self.load(job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(job_id = %job_id, "Record vanished before failure could be recorded");
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, "Cannot reload record to mark failure: {}", e);
                return;
            }
        };
        if let Err(e) = fresh.fail(failure.to_string(), Utc::now()) {
            warn!(job_id = %job_id, "Not marking job failed: {}", e);
            return;
        }
        if let Err(e) = self.save(&fresh).await {
            warn!(job_id = %job_id, "Cannot persist failed state: {}", e);
        }
    }

    async fn load(&self, job_id: &str) -> Result<Option<JobRecord>, JobFailure> {
        let store = Arc::clone(&self.store);
        let id = job_id.to_string();
        let loaded: Result<Option<JobRecord>, StoreError> =
            tokio::task::spawn_blocking(move || store.load(&id))
                .await
                .map_err(|e| JobFailure::Crashed(e.to_string()))?;
        Ok(loaded?)
    }

    async fn save(&self, record: &JobRecord) -> Result<(), JobFailure> {
        let store = Arc::clone(&self.store);
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.save(&record))
            .await
            .map_err(|e| JobFailure::Crashed(e.to_string()))??;
        Ok(())
    }
}

/// Atomic write: temp file next to the target, then rename.
async fn write_result(path: &Path, markdown: &str) -> Result<(), JobFailure> {
    let failed = |e: std::io::Error| JobFailure::ResultWrite {
        path: path.to_path_buf(),
        detail: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, markdown).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use crate::record::NewJob;
    use crate::store::FsJobStore;

    fn queued(store: &FsJobStore, id: &str) -> JobRecord {
        let input = store.job_dir(id).join("input").join("original.pdf");
        std::fs::create_dir_all(input.parent().unwrap()).unwrap();
        std::fs::write(&input, b"%PDF-1.7 fake").unwrap();
        let record = JobRecord::new(
            NewJob {
                id: id.into(),
                filename: "doc.pdf".into(),
                content_type: "application/pdf".into(),
                size_bytes: 13,
                checksum: "00".into(),
                input_uri: input.display().to_string(),
                access_token_digest: "digest".into(),
            },
            Utc::now(),
        );
        store.save(&record).unwrap();
        record
    }

    fn orchestrator<C: Converter>(
        store: &Arc<FsJobStore>,
        converter: C,
    ) -> ConversionOrchestrator<FsJobStore, C> {
        ConversionOrchestrator::new(
            Arc::clone(store),
            Arc::new(converter),
            Duration::from_secs(60),
        )
    }

    fn ok_converter(_: &Path) -> Result<String, ConvertError> {
        Ok("# Converted\n".to_string())
    }

    fn failing_converter(_: &Path) -> Result<String, ConvertError> {
        Err(ConvertError::Other("unreadable document".into()))
    }

    #[tokio::test]
    async fn success_writes_result_and_marks_succeeded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsJobStore::new(dir.path()));
        queued(&store, "j1");

        let output = match orchestrator(&store, ok_converter).process("j1").await {
            Ok(JobOutcome::Succeeded { output }) => output,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(output, store.job_dir("j1").join("output/result.md"));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "# Converted\n");
        assert!(!output.with_extension("md.tmp").exists());

        let r = store.load("j1").unwrap().unwrap();
        assert_eq!(r.status, JobStatus::Succeeded);
        assert_eq!(r.progress, 100);
        assert_eq!(r.output_uri.as_deref(), Some(output.to_str().unwrap()));
        assert!(r.started_at.is_some() && r.completed_at.is_some());
        assert!(r.is_consistent());
    }

    #[tokio::test]
    async fn converter_error_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsJobStore::new(dir.path()));
        queued(&store, "j2");

        let err = orchestrator(&store, failing_converter)
            .process("j2")
            .await
            .unwrap_err();
        assert!(matches!(err, JobFailure::Conversion(_)));

        let r = store.load("j2").unwrap().unwrap();
        assert_eq!(r.status, JobStatus::Failed);
        assert!(r.error.as_deref().unwrap().contains("unreadable document"));
        assert!(r.started_at.is_some());
        assert!(r.failed_at.is_some());
        assert!(r.output_uri.is_none());
        assert_eq!(r.progress, 0);
        assert!(r.is_consistent());
    }

    #[tokio::test]
    async fn panicking_converter_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsJobStore::new(dir.path()));
        queued(&store, "j3");

        let boom = |_: &Path| -> Result<String, ConvertError> { panic!("native crash") };
        let err = orchestrator(&store, boom).process("j3").await.unwrap_err();
        assert!(matches!(err, JobFailure::Crashed(_)));
        assert_eq!(store.load("j3").unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn missing_and_already_handled_jobs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsJobStore::new(dir.path()));
        let orch = orchestrator(&store, ok_converter);

        assert_eq!(orch.process("ghost").await.unwrap(), JobOutcome::Missing);

        queued(&store, "j4");
        orch.process("j4").await.unwrap();
        let before = store.load("j4").unwrap().unwrap();
        assert_eq!(
            orch.process("j4").await.unwrap(),
            JobOutcome::AlreadyHandled(JobStatus::Succeeded)
        );
        assert_eq!(store.load("j4").unwrap().unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_deliveries_run_the_converter_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsJobStore::new(dir.path()));
        queued(&store, "j6");

        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slow = move |input: &Path| -> Result<String, ConvertError> {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            ok_converter(input)
        };
        let orch = orchestrator(&store, slow);
        let twin = orch.clone();
        let (a, b) = tokio::join!(orch.process("j6"), twin.process("j6"));

        let mut outcomes = [a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, JobOutcome::Succeeded { .. }));
        assert!(matches!(
            outcomes[0],
            JobOutcome::Claimed | JobOutcome::AlreadyHandled(JobStatus::Succeeded)
        ));
        assert!(matches!(outcomes[1], JobOutcome::Succeeded { .. }));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.load("j6").unwrap().unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn corrupt_record_is_reported_not_processed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsJobStore::new(dir.path()));
        std::fs::create_dir_all(store.job_dir("j5")).unwrap();
        std::fs::write(store.job_dir("j5").join("job.json"), b"[]").unwrap();

        let err = orchestrator(&store, ok_converter)
            .process("j5")
            .await
            .unwrap_err();
        assert!(matches!(err, JobFailure::Store(_)));
    }
}
