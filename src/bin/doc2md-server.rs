//! HTTP server binary for doc2md-jobs.
//!
//! A thin shim over the library crate that maps CLI flags (with environment
//! fallbacks) to `EngineConfig`, starts the engine and serves the router
//! until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use doc2md_jobs::http::create_router;
use doc2md_jobs::{
    CommandConverter, ConvertError, Converter, DocJobEngine, EngineConfig, PassthroughConverter,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default port with the pdf2md converter on PATH
  doc2md-server --data-dir /var/lib/doc2md

  # Submit a document and poll it
  curl -F file=@report.pdf http://localhost:8080/jobs
  curl -H "Authorization: Bearer <token>" http://localhost:8080/jobs/<id>
  curl -H "Authorization: Bearer <token>" http://localhost:8080/jobs/<id>/result

  # Local smoke test without any converter installed
  doc2md-server --converter passthrough

ENVIRONMENT VARIABLES:
  HOST, PORT                 Listen address (default 0.0.0.0:8080)
  DATA_DIR                   Job storage root (default ./data)
  WORKERS                    Concurrent conversions (default 4)
  MAX_UPLOAD_MB              Upload ceiling in MiB (default 300)
  ALLOWED_MIME               Comma-separated accepted content types
  JOB_TIMEOUT_SEC            Expected per-job upper bound (logged only)
  DOC2MD_CONVERTER           command | passthrough
  DOC2MD_CONVERTER_PROGRAM   Program run by the command converter (default pdf2md)
  DOC2MD_CONVERTER_ARGS      Extra whitespace-separated arguments before the input path
  RUST_LOG                   Overrides --verbose / --quiet
"#;

/// Serve the document-to-Markdown job API.
#[derive(Parser, Debug)]
#[command(
    name = "doc2md-server",
    version,
    about = "Serve the document-to-Markdown job API",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Root directory for job records, uploads and results.
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Number of conversion workers.
    #[arg(short, long, env = "WORKERS", default_value_t = 4)]
    workers: usize,

    /// Upload ceiling in MiB.
    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 300)]
    max_upload_mb: u64,

    /// Accepted content types (comma-separated). Defaults to PDF and Office formats.
    #[arg(long, env = "ALLOWED_MIME", value_delimiter = ',')]
    allowed_mime: Vec<String>,

    /// Expected upper bound for one job, in seconds. Overruns are logged.
    #[arg(long, env = "JOB_TIMEOUT_SEC", default_value_t = 1800)]
    job_timeout_sec: u64,

    /// Converter backend.
    #[arg(long, env = "DOC2MD_CONVERTER", value_enum, default_value = "command")]
    converter: ConverterArg,

    /// Program run by the `command` converter; receives the input path last.
    #[arg(long, env = "DOC2MD_CONVERTER_PROGRAM", default_value = "pdf2md")]
    converter_program: PathBuf,

    /// Extra arguments for the converter program (whitespace-separated).
    #[arg(long, env = "DOC2MD_CONVERTER_ARGS", allow_hyphen_values = true)]
    converter_args: Option<String>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2MD_VERBOSE")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, env = "DOC2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ConverterArg {
    Command,
    Passthrough,
}

/// The converter selected on the command line.
enum ServerConverter {
    Command(CommandConverter),
    Passthrough(PassthroughConverter),
}

impl Converter for ServerConverter {
    fn convert(&self, input: &Path) -> Result<String, ConvertError> {
        match self {
            ServerConverter::Command(c) => c.convert(input),
            ServerConverter::Passthrough(c) => c.convert(input),
        }
    }
}

impl Cli {
    fn converter(&self) -> ServerConverter {
        match self.converter {
            ConverterArg::Command => {
                let args = self
                    .converter_args
                    .as_deref()
                    .unwrap_or_default()
                    .split_whitespace();
                ServerConverter::Command(
                    CommandConverter::new(&self.converter_program).args(args),
                )
            }
            ConverterArg::Passthrough => ServerConverter::Passthrough(PassthroughConverter),
        }
    }

    fn config(&self) -> Result<EngineConfig> {
        let mut builder = EngineConfig::builder()
            .data_dir(&self.data_dir)
            .workers(self.workers)
            .max_upload_mb(self.max_upload_mb)
            .job_timeout_secs(self.job_timeout_sec);
        if !self.allowed_mime.is_empty() {
            builder = builder.allowed_content_types(&self.allowed_mime);
        }
        builder.build().context("invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Engine ───────────────────────────────────────────────────────────
    let config = cli.config()?;
    let data_dir = config.data_dir.clone();
    let engine = DocJobEngine::open(config, cli.converter())
        .with_context(|| format!("cannot open data directory {}", data_dir.display()))?;
    let engine = Arc::new(engine);
    engine.start().await.context("engine startup failed")?;

    // ── HTTP ─────────────────────────────────────────────────────────────
    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(Arc::clone(&engine)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("server error")?;

    engine.stop().await;
    info!("Stopped");
    Ok(())
}
