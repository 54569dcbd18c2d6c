//! Query canonicalization and content-addressed cache keys.
//!
//! Free-text queries that differ only in case or whitespace must map to the
//! same cache entry. [`normalize`] produces the canonical form and [`hash`]
//! turns it into a fixed-width hex key.
//!
//! The hash is the classic multiplicative string hash (seed 5381, `h * 33 + c`)
//! over UTF-16 code units, kept at 64 bits. It is fast and well distributed but
//! not collision free, so the cache stores the canonical query next to the key
//! and re-verifies it on every lookup.

use crate::error::ValidationError;

const HASH_SEED: u64 = 5381;

/// Canonicalize a raw query: trim, lowercase, and collapse every whitespace run
/// into a single ASCII space.
///
/// ```
/// use meterguard::normalize::normalize;
/// assert_eq!(normalize("  Best   Coffee\tNEAR me "), "best coffee near me");
/// ```
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for word in raw.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

/// Hash a canonical query into a 16-character lowercase hex key.
pub fn hash(canonical: &str) -> String {
    let h = canonical
        .encode_utf16()
        .fold(HASH_SEED, |h, unit| h.wrapping_mul(33).wrapping_add(u64::from(unit)));
    format!("{:016x}", h)
}

/// Normalized form and key of a query, rejecting queries that are blank after
/// normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    /// Hex hash of `normalized`.
    pub key: String,
    /// Canonical query text.
    pub normalized: String,
}

impl CacheKey {
    /// Build the key for a raw query.
    pub fn for_query(raw: &str) -> Result<Self, ValidationError> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        Ok(Self { key: hash(&normalized), normalized })
    }
}
