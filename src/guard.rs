//! Bearer-token gate in front of status and result reads.

use crate::error::DocJobError;
use crate::record::JobRecord;
use crate::token::TokenCodec;

/// Decides whether a presented token unlocks a job.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGuard {
    codec: TokenCodec,
}

impl AccessGuard {
    pub fn new(codec: TokenCodec) -> Self {
        Self { codec }
    }

    /// `true` iff the record has a digest and `token` matches it.
    ///
    /// A record without a digest (absent or empty) is never authorized; use
    /// [`AccessGuard::check`] to tell that case apart from a wrong token.
    pub fn authorize(&self, record: &JobRecord, token: &str) -> bool {
        registered_digest(record).is_some_and(|digest| self.codec.verify(digest, token))
    }

    /// Like [`AccessGuard::authorize`] but with the outcome as an error.
    ///
    /// # Errors
    /// - [`DocJobError::NotReady`] when the record carries no digest yet.
    /// - [`DocJobError::Forbidden`] when the token does not match.
    pub fn check(&self, record: &JobRecord, token: &str) -> Result<(), DocJobError> {
        if registered_digest(record).is_none() {
            return Err(DocJobError::NotReady {
                id: record.id.clone(),
                detail: "access token not yet registered",
            });
        }
        if self.authorize(record, token) {
            Ok(())
        } else {
            Err(DocJobError::Forbidden)
        }
    }
}

/// The stored digest, treating an empty string like a missing one.
fn registered_digest(record: &JobRecord) -> Option<&str> {
    record
        .access_token_digest
        .as_deref()
        .filter(|digest| !digest.is_empty())
}

/// Extract the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively. The token itself must be
/// well-formed; whether it matches anything is not checked here.
pub fn bearer_token(header: Option<&str>) -> Result<&str, DocJobError> {
    let header = header.ok_or(DocJobError::Unauthorized {
        reason: "missing bearer token",
    })?;
    let (scheme, token) = header
        .trim()
        .split_once(char::is_whitespace)
        .ok_or(DocJobError::Unauthorized {
            reason: "missing bearer token",
        })?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(DocJobError::Unauthorized {
            reason: "missing bearer token",
        });
    }
    let token = token.trim();
    if !TokenCodec::new().is_well_formed(token) {
        return Err(DocJobError::Unauthorized {
            reason: "malformed token",
        });
    }
    Ok(token)
}
