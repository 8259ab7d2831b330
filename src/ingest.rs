//! Streaming upload ingestion: bytes → job-scoped file + SHA-256.
//!
//! ## Why stream instead of buffering?
//!
//! Uploads may be hundreds of megabytes. Reading in fixed-size chunks keeps
//! memory flat, lets the size ceiling trip the moment it is crossed (rather
//! than after the whole body arrived), and computes the checksum in the same
//! pass that writes the file.
//!
//! The stored file is always named `original<.ext>`: only a sanitised
//! extension survives from the client-supplied name, so a hostile name such
//! as `../../etc/passwd` can never influence where bytes land.

use crate::error::DocJobError;
use crate::media::extension_of;
use sha2::{Digest as _, Sha256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

const STORED_STEM: &str = "original";
const MAX_EXTENSION_LEN: usize = 16;

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedUpload {
    /// Where the bytes were written.
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the bytes.
    pub checksum: String,
    pub size_bytes: u64,
    /// Declared content type, `application/octet-stream` when empty.
    pub content_type: String,
}

/// Streams uploads to disk in bounded chunks.
#[derive(Debug, Clone, Copy)]
pub struct UploadIngestor {
    chunk_size: usize,
}

impl Default for UploadIngestor {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl UploadIngestor {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Stream `source` into a new file under `dest_dir`.
    ///
    /// # Errors
    /// - [`DocJobError::UploadTooLarge`] as soon as more than `size_limit`
    ///   bytes have been read; the partial file is deleted.
    /// - [`DocJobError::MalformedUpload`] when reading `source` fails; the
    ///   partial file is deleted.
    /// - [`DocJobError::Io`] for local write failures, including a file that
    ///   already exists at the destination (left untouched).
    pub async fn ingest<R>(
        &self,
        source: R,
        dest_dir: &Path,
        declared_name: &str,
        declared_content_type: &str,
        size_limit: u64,
    ) -> Result<IngestedUpload, DocJobError>
    where
        R: AsyncRead + Unpin,
    {
        fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| io_error(dest_dir, e))?;
        let path = dest_dir.join(stored_file_name(declared_name));
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        match self.copy_hashed(source, file, &path, size_limit).await {
            Ok((checksum, size_bytes)) => {
                debug!("Ingested {} bytes into {}", size_bytes, path.display());
                Ok(IngestedUpload {
                    path,
                    checksum,
                    size_bytes,
                    content_type: normalise_content_type(declared_content_type),
                })
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&path).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial upload {}: {}", path.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    async fn copy_hashed<R>(
        &self,
        mut source: R,
        mut file: fs::File,
        path: &Path,
        size_limit: u64,
    ) -> Result<(String, u64), DocJobError>
    where
        R: AsyncRead + Unpin,
    {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut total: u64 = 0;

        loop {
            // Read failures come from the client side of the stream.
            let n = source
                .read(&mut buf)
                .await
                .map_err(|e| DocJobError::MalformedUpload {
                    detail: e.to_string(),
                })?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > size_limit {
                return Err(DocJobError::UploadTooLarge {
                    limit_bytes: size_limit,
                });
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|e| io_error(path, e))?;
            hasher.update(&buf[..n]);
        }

        file.flush().await.map_err(|e| io_error(path, e))?;
        file.sync_all().await.map_err(|e| io_error(path, e))?;

        Ok((to_hex(&hasher.finalize()), total))
    }
}

/// `original.<ext>` with the client's extension when it is plain alphanumeric.
pub fn stored_file_name(declared_name: &str) -> String {
    match extension_of(declared_name) {
        Some(ext)
            if ext.len() <= MAX_EXTENSION_LEN && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!("{STORED_STEM}.{ext}")
        }
        _ => STORED_STEM.to_string(),
    }
}

fn normalise_content_type(declared: &str) -> String {
    let trimmed = declared.trim();
    if trimmed.is_empty() {
        "application/octet-stream".to_string()
    } else {
        trimmed.to_string()
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn io_error(path: &Path, source: std::io::Error) -> DocJobError {
    DocJobError::Io {
        path: path.to_path_buf(),
        source,
    }
}
