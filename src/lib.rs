//! # doc2md-jobs
//!
//! Background job engine that turns uploaded documents (PDF, DOCX, PPTX,
//! XLSX, …) into Markdown.
//!
//! ## Why a job engine?
//!
//! Converting a long document takes seconds to minutes. Holding an HTTP
//! request open for that long is fragile, so uploads are accepted
//! immediately, converted by a fixed pool of background workers, and polled
//! for by the client. Each job is protected by a capability token handed out
//! once at submission; only its SHA-256 digest is ever stored.
//!
//! ## Job Flow
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Admit    content type or extension must be supported
//!  ├─ 2. Ingest   stream to <data>/jobs/<id>/input/, SHA-256 + size cap
//!  ├─ 3. Record   job.json written atomically, status = queued
//!  ├─ 4. Queue    id pushed to the dispatcher, token returned to client
//!  ├─ 5. Convert  worker runs the Converter on the blocking pool
//!  └─ 6. Result   output/result.md written, status = succeeded | failed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc2md_jobs::{DocJobEngine, EngineConfig, PassthroughConverter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::builder().data_dir("/tmp/doc2md").build()?;
//!     let engine = DocJobEngine::open(config, PassthroughConverter)?;
//!     engine.start().await?;
//!
//!     let upload: &[u8] = b"# already markdown";
//!     let sub = engine.submit(upload, "notes.pdf", "application/pdf").await?;
//!     engine.wait_idle().await;
//!
//!     let md = engine.result(&sub.job.id, sub.token.expose()).await?;
//!     println!("{md}");
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | HTTP router (`http` module) and the `doc2md-server` binary (axum + clap + anyhow + tracing-subscriber) |
//!
//! Disable `server` when embedding the engine in another service:
//! ```toml
//! doc2md-jobs = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod guard;
pub mod ingest;
pub mod media;
pub mod orchestrator;
pub mod record;
pub mod store;
pub mod token;

#[cfg(feature = "server")]
pub mod http;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EngineConfig, EngineConfigBuilder};
pub use convert::{CommandConverter, Converter, PassthroughConverter};
pub use dispatch::Dispatcher;
pub use engine::{DocJobEngine, RecoveryReport, Submission};
pub use error::{ConvertError, DocJobError, JobFailure, StoreError, TransitionError};
pub use guard::{bearer_token, AccessGuard};
pub use ingest::{IngestedUpload, UploadIngestor};
pub use media::MediaPolicy;
pub use orchestrator::{ConversionOrchestrator, JobOutcome};
pub use record::{JobRecord, JobStatus, JobView, NewJob};
pub use store::{FsJobStore, JobStore};
pub use token::{CapabilityToken, TokenCodec};
