//! Upload admission by content type and filename extension.
//!
//! Browsers and HTTP clients label office documents inconsistently
//! (`application/octet-stream`, legacy PowerPoint types, …), so an upload is
//! accepted when EITHER its content type is allowed OR its filename carries a
//! supported extension. Rejection happens before a single byte is stored.

use crate::config::EngineConfig;
use crate::error::DocJobError;
use std::path::Path;

/// Admission rules derived from [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct MediaPolicy {
    allowed_content_types: Vec<String>,
    supported_extensions: Vec<String>,
}

impl MediaPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            allowed_content_types: config.allowed_content_types.clone(),
            supported_extensions: config.supported_extensions.clone(),
        }
    }

    /// Accept or reject an upload by its declared metadata.
    pub fn check(&self, content_type: &str, filename: &str) -> Result<(), DocJobError> {
        if self.content_type_allowed(content_type) || self.extension_supported(filename) {
            Ok(())
        } else {
            Err(DocJobError::UnsupportedMediaType {
                content_type: content_type.to_string(),
                filename: filename.to_string(),
            })
        }
    }

    fn content_type_allowed(&self, content_type: &str) -> bool {
        let essence = essence(content_type);
        !essence.is_empty() && self.allowed_content_types.iter().any(|t| *t == essence)
    }

    fn extension_supported(&self, filename: &str) -> bool {
        extension_of(filename)
            .map(|ext| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.supported_extensions.contains(&ext))
    }
}

/// `"Application/PDF; charset=binary"` → `"application/pdf"`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Extension of the last path component of a client-supplied name.
///
/// Both `/` and `\` count as separators so Windows-style names behave the same.
pub fn extension_of(filename: &str) -> Option<&str> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    Path::new(base).extension().and_then(|e| e.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MediaPolicy {
        MediaPolicy::from_config(&EngineConfig::default())
    }

    #[test]
    fn allowed_content_type_passes_regardless_of_name() {
        assert!(policy().check("application/pdf", "notes.txt").is_ok());
        assert!(policy().check("Application/PDF; charset=binary", "x").is_ok());
    }

    #[test]
    fn supported_extension_rescues_odd_content_type() {
        assert!(policy().check("application/octet-stream", "deck.PPTX").is_ok());
        assert!(policy().check("", "sheet.xlsx").is_ok());
    }

    #[test]
    fn both_unrecognised_is_rejected() {
        let err = policy().check("image/gif", "cat.gif").unwrap_err();
        assert_eq!(err.code(), "unsupported_media_type");
        assert!(policy().check("", "README").is_err());
    }

    #[test]
    fn extension_of_uses_last_component() {
        assert_eq!(extension_of("a/b/report.pdf"), Some("pdf"));
        assert_eq!(extension_of("C:\\docs\\deck.pptx"), Some("pptx"));
        assert_eq!(extension_of("archive.tar.gz"), Some("gz"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of(".hidden"), None);
    }
}
