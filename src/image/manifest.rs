//! Image manifest and config parsing
//!
//! The registry-copy tool writes a `dir:` layout: `manifest.json` plus one
//! blob per layer and one for the image config, each named by its digest
//! hex. Layer order in the manifest is the overlay stacking order, bottom
//! layer first.

use crate::error::{CairnError, CairnResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Manifest file name inside a fetched image directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// An image manifest: ordered layers plus a config descriptor
#[derive(Debug, Clone, Deserialize)]
pub struct ImageManifest {
    /// Image config descriptor
    pub config: Descriptor,

    /// Layer descriptors, bottom layer first
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// A content descriptor referencing one blob by digest
#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    /// Content digest, e.g. "sha256:abc..."
    pub digest: String,

    /// Blob media type
    #[serde(rename = "mediaType", default)]
    pub media_type: String,

    /// Blob size in bytes
    #[serde(default)]
    pub size: u64,
}

impl Descriptor {
    /// The digest hex with the algorithm prefix stripped.
    ///
    /// Blobs in the fetched directory are named by this value.
    pub fn digest_hex(&self) -> CairnResult<&str> {
        self.digest
            .split_once(':')
            .map(|(_, hex)| hex)
            .filter(|hex| !hex.is_empty())
            .ok_or_else(|| CairnError::ManifestInvalid {
                reason: format!("malformed digest {:?}", self.digest),
            })
    }

    /// Path of this blob inside the fetched image directory
    pub fn blob_path(&self, dir: &Path) -> CairnResult<PathBuf> {
        Ok(dir.join(self.digest_hex()?))
    }
}

impl ImageManifest {
    /// Parse a manifest from a JSON string
    pub fn parse(content: &str) -> CairnResult<Self> {
        serde_json::from_str(content).map_err(|e| CairnError::ManifestInvalid {
            reason: e.to_string(),
        })
    }

    /// Load `manifest.json` from a fetched image directory
    pub async fn from_dir(dir: &Path) -> CairnResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CairnError::io(format!("reading manifest {}", path.display()), e))?;
        Self::parse(&content)
    }
}

/// The subset of the image config blob this pipeline reads
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Declared operating system
    #[serde(default)]
    pub os: String,

    /// Declared CPU architecture
    #[serde(default)]
    pub architecture: String,
}

impl ImageConfig {
    /// Parse an image config from a JSON string
    pub fn parse(content: &str) -> CairnResult<Self> {
        serde_json::from_str(content).map_err(|e| CairnError::ManifestInvalid {
            reason: format!("image config: {}", e),
        })
    }

    /// Load an image config blob from disk
    pub async fn from_file(path: &Path) -> CairnResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CairnError::io(format!("reading image config {}", path.display()), e))?;
        Self::parse(&content)
    }
}
