//! Capability tokens: issuance, storage digest, and verification.
//!
//! A token is 32 bytes from the operating system's CSPRNG, rendered as
//! unpadded URL-safe base64 (43 characters). Only a digest is ever persisted:
//! SHA-256 over the token's raw bytes, rendered in the same alphabet.
//!
//! Digests produced by the previous memory-hard scheme are Argon2id PHC
//! strings (`$argon2id$v=19$…`). [`TokenCodec::verify`] accepts both formats
//! and answers with a plain `bool` either way.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest as _, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// Raw token size in bytes (256 bits of entropy).
pub const TOKEN_BYTES: usize = 32;

/// Length of an encoded token without padding.
pub const TOKEN_LEN: usize = 43;

const LEGACY_PREFIX: &str = "$argon2";

static TOKEN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+={0,2}$").expect("static regex"));

/// A well-formed capability token.
///
/// `Debug` and `Display` never print the secret; use [`CapabilityToken::expose`]
/// at the single place the token is handed to its owner.
#[derive(Clone, PartialEq, Eq)]
pub struct CapabilityToken {
    text: String,
    raw: [u8; TOKEN_BYTES],
}

impl CapabilityToken {
    /// The encoded token, for returning to the submitting client.
    pub fn expose(&self) -> &str {
        &self.text
    }

    fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CapabilityToken(<redacted>)")
    }
}

impl fmt::Display for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Issues, digests, and verifies capability tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCodec;

impl TokenCodec {
    pub fn new() -> Self {
        Self
    }

    /// Generate a fresh token from the OS random source.
    pub fn issue(&self) -> CapabilityToken {
        let mut raw = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut raw);
        CapabilityToken {
            text: URL_SAFE_NO_PAD.encode(raw),
            raw,
        }
    }

    /// Parse presented token text.
    ///
    /// Up to two trailing `=` pads are tolerated and stripped. Returns `None`
    /// for anything that is not exactly 32 bytes of URL-safe base64.
    pub fn parse(&self, text: &str) -> Option<CapabilityToken> {
        let text = text.trim();
        if !TOKEN_SHAPE.is_match(text) {
            return None;
        }
        let text = text.trim_end_matches('=');
        if text.len() != TOKEN_LEN {
            return None;
        }
        let decoded = URL_SAFE_NO_PAD.decode(text).ok()?;
        let raw: [u8; TOKEN_BYTES] = decoded.try_into().ok()?;
        Some(CapabilityToken {
            text: text.to_string(),
            raw,
        })
    }

    /// `true` when `text` would be accepted by [`TokenCodec::parse`].
    pub fn is_well_formed(&self, text: &str) -> bool {
        self.parse(text).is_some()
    }

    /// One-way digest of the token, safe to persist.
    pub fn digest(&self, token: &CapabilityToken) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(token.raw()))
    }

    /// Check presented token text against a stored digest.
    ///
    /// Never errors: malformed tokens and unreadable digests yield `false`.
    pub fn verify(&self, stored_digest: &str, presented: &str) -> bool {
        let Some(token) = self.parse(presented) else {
            return false;
        };
        if stored_digest.starts_with(LEGACY_PREFIX) {
            verify_legacy(stored_digest, &token)
        } else {
            constant_time_str_eq(&self.digest(&token), stored_digest)
        }
    }
}

fn verify_legacy(phc: &str, token: &CapabilityToken) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(token.raw(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// Digests have a fixed public length, so the early length check reveals nothing.
fn constant_time_str_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
