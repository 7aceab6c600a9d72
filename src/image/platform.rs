//! Platform parsing and verification
//!
//! A platform is the `OS/ARCH` pair an image is requested for. Registries
//! can silently misresolve multi-arch lists, so the fetched config blob is
//! checked against the request before any conversion work starts.

use crate::error::{CairnError, CairnResult};
use crate::image::manifest::ImageConfig;
use std::fmt;
use std::str::FromStr;

/// A requested (OS, architecture) pair, e.g. linux/amd64
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    /// Operating system, e.g. "linux"
    pub os: String,
    /// CPU architecture, e.g. "amd64"
    pub arch: String,
}

impl Platform {
    /// Parse an `OS/ARCH` string.
    ///
    /// Exactly one `/` separating two non-empty components.
    pub fn parse(s: &str) -> CairnResult<Self> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(os), Some(arch), None) if !os.is_empty() && !arch.is_empty() => Ok(Self {
                os: os.to_string(),
                arch: arch.to_string(),
            }),
            _ => Err(CairnError::InvalidPlatform(s.to_string())),
        }
    }

    /// Verify the fetched image config declares exactly this platform.
    ///
    /// Exact string equality on both fields; a mismatch aborts the run.
    pub fn verify(&self, config: &ImageConfig) -> CairnResult<()> {
        if config.os != self.os || config.architecture != self.arch {
            return Err(CairnError::PlatformMismatch {
                requested: self.to_string(),
                actual: format!("{}/{}", config.os, config.architecture),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = CairnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
