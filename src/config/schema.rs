//! Configuration schema for Cairn
//!
//! Configuration is stored at `~/.config/cairn/config.toml`

use crate::error::{CairnError, CairnResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Image defaults
    pub image: ImageDefaults,

    /// Cache settings
    pub cache: CacheConfig,

    /// Fetch behavior
    pub fetch: FetchConfig,
}

/// Default image reference and platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageDefaults {
    /// Image pulled when none is given on the command line
    pub reference: String,

    /// Platform requested when none is given (OS/ARCH)
    pub platform: String,
}

impl Default for ImageDefaults {
    fn default() -> Self {
        Self {
            reference: "ubuntu:20.04".to_string(),
            platform: "linux/amd64".to_string(),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root override. When unset, $XDG_CACHE_HOME or ~/.cache is used.
    pub root: Option<PathBuf>,
}

/// Fetch behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Probe the local image store before falling back to the remote registry
    pub prefer_local: bool,

    /// Skip signature policy enforcement when copying
    pub insecure_policy: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            prefer_local: true,
            insecure_policy: true,
        }
    }
}

impl Config {
    /// Resolve the cache root directory.
    ///
    /// Order: `[cache].root` from the config file, then `$XDG_CACHE_HOME`,
    /// then `$HOME/.cache`. Absence of all three is a fatal configuration
    /// error. Resolved once and threaded into the cache store, never read
    /// again mid-pipeline.
    pub fn cache_root(&self) -> CairnResult<PathBuf> {
        if let Some(ref root) = self.cache.root {
            return Ok(root.clone());
        }

        if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(xdg));
        }

        if let Some(home) = std::env::var_os("HOME").filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(home).join(".cache"));
        }

        Err(CairnError::CacheRootUnavailable)
    }
}
