//! Error types for the doc2md-jobs library.
//!
//! Two distinct error families reflect two distinct failure modes:
//!
//! * [`DocJobError`]: caller-facing. The request cannot be served
//!   (upload too large, wrong token, unknown job). Returned as
//!   `Err(DocJobError)` from the engine's `submit`/`status`/`result` calls and
//!   mapped one-to-one onto HTTP status codes by the transport.
//!
//! * [`JobFailure`]: per-job. A single job failed after it was dequeued
//!   (converter error, result write, store hiccup). It never propagates out of
//!   a worker; its display text is recorded in [`crate::record::JobRecord`]'s
//!   `error` field and the worker moves on to the next job.
//!
//! [`ConvertError`] and [`StoreError`] are the single error types of the two
//! pluggable collaborators, [`crate::convert::Converter`] and
//! [`crate::store::JobStore`].

use crate::record::JobStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All caller-facing errors returned by the doc2md-jobs engine.
#[derive(Debug, Error)]
pub enum DocJobError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// The upload stream exceeded the configured ceiling; partial data was discarded.
    #[error("upload exceeds the {limit_bytes}-byte limit")]
    UploadTooLarge { limit_bytes: u64 },

    /// Neither the declared content type nor the filename extension is supported.
    #[error("content-type '{content_type}' not allowed for '{filename}'")]
    UnsupportedMediaType {
        content_type: String,
        filename: String,
    },

    /// The upload stream broke off or could not be decoded. Nothing was kept.
    #[error("malformed upload: {detail}")]
    MalformedUpload { detail: String },

    // ── Access errors ─────────────────────────────────────────────────────
    /// No job is stored under this id.
    #[error("job '{id}' not found")]
    JobNotFound { id: String },

    /// The credential is missing or malformed. Resubmitting a well-formed
    /// bearer token may succeed.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: &'static str },

    /// The credential is well-formed but does not match the job.
    #[error("invalid token")]
    Forbidden,

    /// The job exists but the requested material is not available yet.
    #[error("job '{id}' not ready: {detail}")]
    NotReady { id: String, detail: &'static str },

    // ── Infrastructure errors ─────────────────────────────────────────────
    /// The job store failed to load or persist a record.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Filesystem failure outside the store (upload or result files).
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine has been stopped and no longer accepts jobs.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocJobError {
    /// Stable machine-readable code, used in transport error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DocJobError::UploadTooLarge { .. } => "payload_too_large",
            DocJobError::UnsupportedMediaType { .. } => "unsupported_media_type",
            DocJobError::MalformedUpload { .. } => "bad_request",
            DocJobError::JobNotFound { .. } => "not_found",
            DocJobError::Unauthorized { .. } => "unauthorized",
            DocJobError::Forbidden => "forbidden",
            DocJobError::NotReady { .. } => "not_ready",
            DocJobError::ShuttingDown => "shutting_down",
            DocJobError::InvalidConfig(_) => "invalid_config",
            DocJobError::Store(_) | DocJobError::Io { .. } | DocJobError::Internal(_) => "internal",
        }
    }

    /// `true` for errors caused by the request rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DocJobError::UploadTooLarge { .. }
                | DocJobError::UnsupportedMediaType { .. }
                | DocJobError::MalformedUpload { .. }
                | DocJobError::JobNotFound { .. }
                | DocJobError::Unauthorized { .. }
                | DocJobError::Forbidden
                | DocJobError::NotReady { .. }
        )
    }
}

/// A failure of one job after it was dequeued.
///
/// Stored (as text) in the job record; the worker loop survives it.
#[derive(Debug, Clone, Error)]
pub enum JobFailure {
    /// The converter raised or returned an error.
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConvertError),

    /// The converted Markdown could not be written.
    #[error("failed to write result '{path}': {detail}")]
    ResultWrite { path: PathBuf, detail: String },

    /// A record load/save failed mid-job.
    #[error("job store error: {0}")]
    Store(String),

    /// The record was not in a state that allows the requested transition.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A blocking task panicked or was cancelled.
    #[error("worker task crashed: {0}")]
    Crashed(String),
}

impl From<StoreError> for JobFailure {
    fn from(e: StoreError) -> Self {
        JobFailure::Store(e.to_string())
    }
}

/// The single error type of the [`crate::convert::Converter`] interface.
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    /// The input document could not be read.
    #[error("cannot read input '{path}': {detail}")]
    Input { path: PathBuf, detail: String },

    /// The external conversion program could not be started.
    #[error("cannot start '{program}': {detail}")]
    Spawn { program: String, detail: String },

    /// The external conversion program exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    Exited {
        program: String,
        status: String,
        stderr: String,
    },

    /// The converter produced something that is not UTF-8 Markdown.
    #[error("converter output is not valid UTF-8")]
    InvalidOutput,

    /// Any other converter-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Errors raised by a [`crate::store::JobStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the record file failed.
    #[error("job store I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored record is not valid JSON for the current schema.
    #[error("job record '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The record could not be serialised.
    #[error("cannot serialise job record: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// A rejected state-machine transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job '{id}' cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: String,
    pub from: JobStatus,
    pub to: JobStatus,
}
