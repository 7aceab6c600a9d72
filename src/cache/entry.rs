//! Cache entry layout and transaction management
//!
//! An entry directory holds the canonical artifact, the extracted image
//! config, and (during a run) a working subdirectory with the fetched
//! manifest and layer blobs. Publication is a same-directory rename from a
//! `.tmp` name, so a reader never observes a half-written artifact at the
//! canonical path. A [`CleanupGuard`] removes the whole entry on any failed
//! run; note there is no cross-process lock, so two concurrent runs for the
//! same key may duplicate work.

use crate::cache::key::CacheKey;
use crate::error::{CairnError, CairnResult};
use crate::image::ImageConfig;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Canonical artifact file name inside an entry
pub const ARTIFACT_FILE: &str = "image.erofs";

/// Temporary artifact name used until atomic publish
pub const ARTIFACT_TMP_FILE: &str = "image.erofs.tmp";

/// Extracted image config file name
pub const CONFIG_FILE: &str = "config.json";

/// Transient working subdirectory for fetched manifest and layer blobs
pub const LAYERS_DIR: &str = "layers";

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// State of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Entry has a published artifact
    Complete,
    /// Entry exists without an artifact (in progress or crashed run)
    Building,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Building => write!(f, "building"),
        }
    }
}

/// Listing record for one cache entry
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// The entry's key (directory name)
    pub key: String,
    /// Whether the artifact has been published
    pub state: CacheState,
    /// Platform read from the entry's config file, when present
    pub platform: Option<String>,
    /// Total size of the entry directory
    pub size_bytes: u64,
    /// Last modification of the entry directory
    pub modified: Option<DateTime<Utc>>,
}

/// The on-disk image cache: one subdirectory per cache key
#[derive(Debug, Clone)]
pub struct CacheStore {
    images_dir: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at the user cache directory.
    ///
    /// Entries live under `<cache_root>/cairn/images/`.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: cache_root.into().join("cairn").join("images"),
        }
    }

    /// The directory holding all entries
    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// The entry for a cache key (not yet created on disk)
    pub fn entry(&self, key: &CacheKey) -> CacheEntry {
        CacheEntry {
            dir: self.images_dir.join(key.as_str()),
        }
    }

    /// Enumerate all entries in the store
    pub async fn list(&self) -> CairnResult<Vec<EntryInfo>> {
        let mut entries = Vec::new();

        let mut dir = match fs::read_dir(&self.images_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => {
                return Err(CairnError::io(
                    format!("reading cache dir {}", self.images_dir.display()),
                    e,
                ))
            }
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CairnError::io("enumerating cache entries", e))?
        {
            let path = item.path();
            if !path.is_dir() {
                continue;
            }

            let entry = CacheEntry { dir: path.clone() };
            let state = if entry.is_complete() {
                CacheState::Complete
            } else {
                CacheState::Building
            };

            let platform = match ImageConfig::from_file(&entry.config_path()).await {
                Ok(config) => Some(format!("{}/{}", config.os, config.architecture)),
                Err(_) => None,
            };

            let modified = item
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);

            entries.push(EntryInfo {
                key: item.file_name().to_string_lossy().into_owned(),
                state,
                platform,
                size_bytes: dir_size(&path).await,
                modified,
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Remove every entry in the store
    pub async fn clear(&self) -> CairnResult<()> {
        match fs::remove_dir_all(&self.images_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CairnError::io(
                format!("clearing cache dir {}", self.images_dir.display()),
                e,
            )),
        }
    }
}

/// One cache entry directory
#[derive(Debug, Clone)]
pub struct CacheEntry {
    dir: PathBuf,
}

impl CacheEntry {
    /// The entry directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical artifact path
    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(ARTIFACT_FILE)
    }

    /// Temporary artifact path used during merge
    pub fn artifact_tmp_path(&self) -> PathBuf {
        self.dir.join(ARTIFACT_TMP_FILE)
    }

    /// Extracted image config path
    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    /// Working subdirectory for fetched manifest and blobs
    pub fn layers_dir(&self) -> PathBuf {
        self.dir.join(LAYERS_DIR)
    }

    /// Ensure the entry directory exists, creating parents as needed.
    ///
    /// With `refresh`, an existing entry is destroyed first so the pipeline
    /// re-runs from scratch even if a valid artifact was present.
    pub async fn acquire(&self, refresh: bool) -> CairnResult<()> {
        if refresh && self.dir.exists() {
            debug!("Refreshing cache entry {}", self.dir.display());
            fs::remove_dir_all(&self.dir)
                .await
                .map_err(|e| CairnError::io(format!("removing {}", self.dir.display()), e))?;
        }

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CairnError::io(format!("creating {}", self.dir.display()), e))
    }

    /// True iff the canonical artifact exists.
    ///
    /// On true the caller must short-circuit the pipeline: no fetch, no
    /// conversion, just return the artifact path.
    pub fn is_complete(&self) -> bool {
        self.artifact_path().is_file()
    }

    /// Atomically publish the temporary artifact under its canonical name.
    ///
    /// Same-directory rename, so the canonical path flips from absent to
    /// fully written in one step.
    pub async fn publish(&self) -> CairnResult<PathBuf> {
        let tmp = self.artifact_tmp_path();
        let artifact = self.artifact_path();

        fs::rename(&tmp, &artifact)
            .await
            .map_err(|e| CairnError::PublishFailed {
                path: artifact.clone(),
                source: e,
            })?;

        debug!("Published {}", artifact.display());
        Ok(artifact)
    }

    /// Arm a guard that removes this entry unless disarmed
    pub fn cleanup_guard(&self) -> CleanupGuard {
        CleanupGuard {
            dir: self.dir.clone(),
            armed: true,
        }
    }
}

/// Scoped cleanup of a cache entry.
///
/// Created at pipeline start; removes the entire entry directory on drop
/// unless [`disarm`](Self::disarm) was called. Disarmed exactly once,
/// immediately after the artifact is published, so every error path leaves
/// the cache without a corrupt entry.
#[derive(Debug)]
pub struct CleanupGuard {
    dir: PathBuf,
    armed: bool,
}

impl CleanupGuard {
    /// Keep the entry: the artifact was published
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean up cache entry {}: {}", self.dir.display(), e);
            }
        } else {
            debug!("Removed incomplete cache entry {}", self.dir.display());
        }
    }
}

/// Total size of a directory tree, best effort
async fn dir_size(root: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(item)) = entries.next_entry().await {
            let Ok(meta) = item.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                stack.push(item.path());
            } else {
                total += meta.len();
            }
        }
    }

    total
}
