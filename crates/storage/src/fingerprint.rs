//! Content addressing of request parameters.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use i2o_common::RequestParams;

/// Storage-safe cache key: lowercase hex digest, optionally prefixed by a scope.
///
/// Only ASCII letters, digits and hyphens appear in a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept an externally supplied key, e.g. from an admin request path.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        valid.then(|| Self(raw.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fingerprint request parameters. Insertion order never affects the key.
pub fn fingerprint(params: &RequestParams) -> CacheKey {
    CacheKey(digest(&params.canonical_json()))
}

/// Fingerprint scoped to an endpoint, e.g. `raster-<digest>`.
///
/// Scopes keep identical parameter sets for different artifact kinds apart.
pub fn scoped_fingerprint(scope: &str, params: &RequestParams) -> CacheKey {
    let scope: String = scope
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let hash = digest(&params.canonical_json());
    if scope.is_empty() {
        CacheKey(hash)
    } else {
        CacheKey(format!("{}-{}", scope, hash))
    }
}

fn digest(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
