//! Content-addressed cache keys
//!
//! A key is the SHA-256 digest of `"{os}-{arch}-{image}"`. Same request,
//! same key; any change to OS, architecture, or image reference moves the
//! request to a different cache entry.

use crate::error::{CairnError, CairnResult};
use crate::image::Platform;
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of key characters shown in listings
const SHORT_LEN: usize = 12;

/// A cache key: 64 hex characters naming one cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a platform + image reference pair.
    ///
    /// Pure function, no side effects. Fails on an empty image reference;
    /// platform validity is enforced by [`Platform::parse`].
    pub fn for_image(platform: &Platform, image: &str) -> CairnResult<Self> {
        if image.is_empty() {
            return Err(CairnError::InvalidInput(
                "image reference must not be empty".to_string(),
            ));
        }

        let mut hasher = Sha256::new();
        hasher.update(format!("{}-{}-{}", platform.os, platform.arch, image).as_bytes());
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// The full 64-character hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated form for display
    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
