//! Document → Markdown converters.
//!
//! ## Why a trait?
//!
//! The engine owns queuing, state and access control; it does not care how a
//! PDF or a slide deck becomes Markdown. [`Converter`] is the single seam:
//! given the stored upload, return the Markdown text or a [`ConvertError`].
//!
//! Conversions are CPU-heavy and blocking. The orchestrator always calls
//! [`Converter::convert`] from `tokio::task::spawn_blocking`, so
//! implementations are plain synchronous code.
//!
//! Two implementations ship with the crate:
//!
//! * [`CommandConverter`] runs an external program (by default `pdf2md`) and
//!   captures its standard output.
//! * [`PassthroughConverter`] returns the upload unchanged when it is already
//!   UTF-8 text; useful for smoke tests and local development.
//!
//! Any `Fn(&Path) -> Result<String, ConvertError>` closure is a converter too.

use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Longest stderr excerpt kept in a [`ConvertError::Exited`].
const STDERR_TAIL: usize = 2048;

/// Turns one stored document into Markdown.
pub trait Converter: Send + Sync + 'static {
    fn convert(&self, input: &Path) -> Result<String, ConvertError>;
}

impl<F> Converter for F
where
    F: Fn(&Path) -> Result<String, ConvertError> + Send + Sync + 'static,
{
    fn convert(&self, input: &Path) -> Result<String, ConvertError> {
        self(input)
    }
}

// ── External program ─────────────────────────────────────────────────────

/// Runs `<program> <args…> <input>` and reads Markdown from stdout.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: PathBuf,
    args: Vec<String>,
}

impl Default for CommandConverter {
    fn default() -> Self {
        Self::new("pdf2md")
    }
}

impl CommandConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before the input path.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl Converter for CommandConverter {
    fn convert(&self, input: &Path) -> Result<String, ConvertError> {
        if !input.is_file() {
            return Err(ConvertError::Input {
                path: input.to_path_buf(),
                detail: "file does not exist".into(),
            });
        }

        debug!("Running {} on {}", self.program_name(), input.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ConvertError::Spawn {
                program: self.program_name(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ConvertError::Exited {
                program: self.program_name(),
                status: output.status.to_string(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| ConvertError::InvalidOutput)
    }
}

/// Last `max` bytes of `s`, trimmed, cut on a char boundary.
fn tail(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &s[start..])
}

// ── Passthrough ──────────────────────────────────────────────────────────

/// Returns the upload itself; rejects anything that is not UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughConverter;

impl Converter for PassthroughConverter {
    fn convert(&self, input: &Path) -> Result<String, ConvertError> {
        let bytes = std::fs::read(input).map_err(|e| ConvertError::Input {
            path: input.to_path_buf(),
            detail: e.to_string(),
        })?;
        String::from_utf8(bytes).map_err(|_| ConvertError::InvalidOutput)
    }
}
