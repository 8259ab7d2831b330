//! Configuration for the job engine.
//!
//! All engine behaviour is controlled through [`EngineConfig`], built via its
//! [`EngineConfigBuilder`]. The HTTP binary maps its flags (and their
//! environment-variable fallbacks) onto the builder; tests build small
//! configs pointing at a temporary data directory.

use crate::error::DocJobError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Content types accepted without looking at the filename.
pub const DEFAULT_ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.openxmlformats-officedocument.presentationml.slideshow",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

/// Filename extensions accepted even when the client sends an odd content type.
pub const DEFAULT_SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "pptx", "ppsx", "ppt", "xlsx"];

/// Configuration for a [`crate::engine::DocJobEngine`].
///
/// # Example
/// ```rust
/// use doc2md_jobs::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .data_dir("/var/lib/doc2md")
///     .workers(8)
///     .max_upload_mb(50)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root of the job tree; records live under `<data_dir>/jobs/<id>/`. Default: `./data`.
    pub data_dir: PathBuf,

    /// Number of worker tasks draining the queue. Default: 4.
    ///
    /// Each worker holds one job at a time, so this is also the maximum
    /// number of converter calls in flight.
    pub workers: usize,

    /// Upload ceiling in bytes. Default: 300 MiB.
    pub max_upload_bytes: u64,

    /// Read size used while streaming an upload to disk. Default: 1 MiB.
    pub chunk_size: usize,

    /// Accepted content types (lowercase, without parameters).
    pub allowed_content_types: Vec<String>,

    /// Accepted filename extensions (lowercase, without the dot).
    pub supported_extensions: Vec<String>,

    /// Expected upper bound for one job's processing time. Default: 1800 s.
    ///
    /// Read-only: jobs exceeding it are logged, never aborted.
    pub job_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            workers: 4,
            max_upload_bytes: 300 * MIB,
            chunk_size: MIB as usize,
            allowed_content_types: DEFAULT_ALLOWED_CONTENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            supported_extensions: DEFAULT_SUPPORTED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            job_timeout_secs: 1800,
        }
    }
}

impl EngineConfig {
    /// Create a new builder for `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory holding one sub-directory per job.
    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn max_upload_mb(mut self, mb: u64) -> Self {
        self.config.max_upload_bytes = mb.saturating_mul(MIB);
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size = bytes.max(1);
        self
    }

    /// Replace the allowed content types. Entries are trimmed and lowercased.
    pub fn allowed_content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_content_types = normalise(types, |s| s);
        self
    }

    /// Replace the supported extensions. A leading dot is optional.
    pub fn supported_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.supported_extensions = normalise(exts, |s| s.trim_start_matches('.'));
        self
    }

    pub fn job_timeout_secs(mut self, secs: u64) -> Self {
        self.config.job_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EngineConfig, DocJobError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(DocJobError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if c.max_upload_bytes == 0 {
            return Err(DocJobError::InvalidConfig(
                "max upload size must be > 0".into(),
            ));
        }
        if c.data_dir.as_os_str().is_empty() {
            return Err(DocJobError::InvalidConfig("data_dir is empty".into()));
        }
        Ok(self.config)
    }
}

fn normalise<I, S>(items: I, strip: impl Fn(&str) -> &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| strip(s.as_ref().trim()).to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.workers, 4);
        assert_eq!(c.max_upload_bytes, 300 * MIB);
        assert_eq!(c.chunk_size, 1024 * 1024);
        assert_eq!(c.job_timeout(), Duration::from_secs(1800));
        assert!(c.allowed_content_types.iter().any(|t| t == "application/pdf"));
        assert_eq!(c.jobs_dir(), PathBuf::from("./data/jobs"));
    }

    #[test]
    fn builder_clamps_workers_and_chunk() {
        let c = EngineConfig::builder()
            .workers(0)
            .chunk_size(0)
            .build()
            .unwrap();
        assert_eq!(c.workers, 1);
        assert_eq!(c.chunk_size, 1);
    }

    #[test]
    fn builder_normalises_lists() {
        let c = EngineConfig::builder()
            .allowed_content_types([" Application/PDF ", ""])
            .supported_extensions([".PDF", "txt"])
            .build()
            .unwrap();
        assert_eq!(c.allowed_content_types, vec!["application/pdf"]);
        assert_eq!(c.supported_extensions, vec!["pdf", "txt"]);
    }

    #[test]
    fn zero_upload_limit_is_rejected() {
        let err = EngineConfig::builder().max_upload_bytes(0).build().unwrap_err();
        assert!(matches!(err, DocJobError::InvalidConfig(_)));
    }
}
