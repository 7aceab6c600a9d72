//! Capability traits for the external tools
//!
//! Each external tool invocation is modeled as a trait so the pipeline's
//! ordering and atomicity logic can be tested with fake implementations,
//! decoupled from the exact invocation syntax of skopeo and mkfs.erofs.

use crate::error::CairnResult;
use crate::image::Platform;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where an image copy is sourced from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// The local image store (e.g. a running Docker daemon)
    LocalStore,
    /// A remote registry
    RemoteRegistry,
}

impl fmt::Display for FetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalStore => write!(f, "local store"),
            Self::RemoteRegistry => write!(f, "remote registry"),
        }
    }
}

/// Obtains manifest, config, and layer blobs for an image
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Check whether the local image store holds this image for the exact
    /// platform. A false result is not an error; it routes the copy to the
    /// remote registry instead.
    async fn probe_local(&self, image: &str, platform: &Platform) -> CairnResult<bool>;

    /// Copy the image into `dest`: a directory containing `manifest.json`
    /// plus one blob per layer and one for the image config, each named by
    /// digest hex, layer archives decompressed.
    ///
    /// Must fail rather than silently partially populate; the caller's
    /// cleanup guard owns recovery of a partial directory.
    async fn fetch(
        &self,
        image: &str,
        platform: &Platform,
        source: FetchSource,
        dest: &Path,
    ) -> CairnResult<()>;
}

/// Converts one layer archive into a mountable filesystem fragment
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert the layer archive at `layer` into a fragment at `dest`,
    /// preserving whiteout markers so deletions survive the merge.
    async fn convert(&self, layer: &Path, dest: &Path) -> CairnResult<()>;
}

/// Composes ordered fragments into one overlay filesystem image
#[async_trait]
pub trait Merger: Send + Sync {
    /// Compose `fragments` (bottom layer first) into an overlay image at
    /// `dest`. Later fragments shadow earlier ones; whiteouts in a higher
    /// layer delete paths from lower layers.
    async fn merge(&self, fragments: &[PathBuf], dest: &Path) -> CairnResult<()>;
}
