//! Content fingerprints for exact-duplicate detection
//!
//! A fingerprint is the SHA-256 hex digest of
//! `normalize(title)|company_key(company)|lower(canton)|date_posted`, always in
//! that order. Formatting differences (case, accents, whitespace, legal form)
//! collapse to the same digest.

use crate::core::normalize::{canton_code, company_key, normalize_opt};
use crate::core::record::RawRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 hex digest identifying a posting's content
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a stored hex digest
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fingerprint a raw record
pub fn fingerprint(record: &RawRecord) -> Fingerprint {
    fingerprint_parts(
        record.title.as_deref(),
        record.company_name.as_deref(),
        record.canton.as_deref(),
        record.date_posted.as_deref(),
    )
}

/// Fingerprint the identifying fields directly
pub fn fingerprint_parts(
    title: Option<&str>,
    company_name: Option<&str>,
    canton: Option<&str>,
    date_posted: Option<&str>,
) -> Fingerprint {
    let key = format!(
        "{}|{}|{}|{}",
        normalize_opt(title),
        company_name.map(company_key).unwrap_or_default(),
        canton_code(canton),
        date_posted.map(str::trim).unwrap_or_default(),
    );

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    Fingerprint(format!("{:x}", hasher.finalize()))
}
