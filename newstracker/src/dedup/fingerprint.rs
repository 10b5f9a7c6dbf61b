use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::canonical::normalize_content;

/// Hex-encoded SHA-256 of normalized article content (64 chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }

    /// Accept a stored digest if it has the expected shape.
    pub fn from_hex(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(ContentFingerprint(value.to_ascii_lowercase()))
        } else {
            None
        }
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of text that has already been through `normalize_content`.
pub fn fingerprint(normalized_text: &str) -> ContentFingerprint {
    ContentFingerprint(hex::encode(Sha256::digest(normalized_text.as_bytes())))
}

/// Normalize raw article content, then digest it.
pub fn content_fingerprint(raw_content: &str) -> ContentFingerprint {
    fingerprint(&normalize_content(raw_content))
}
