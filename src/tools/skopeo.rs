//! Skopeo-backed registry fetcher
//!
//! Copies an image into a `dir:` layout, preferring the local image store
//! when it already holds the image for the exact requested platform.

use crate::error::{CairnError, CairnResult};
use crate::image::Platform;
use crate::tools::capability::{FetchSource, Fetcher};
use crate::tools::{finish_child, spawn_error, stream_child_output};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

const SKOPEO: &str = "skopeo";
const INSTALL_HINT: &str = "Install skopeo (https://github.com/containers/skopeo)";

/// Fetcher shelling out to skopeo
pub struct SkopeoFetcher {
    insecure_policy: bool,
}

impl SkopeoFetcher {
    /// Create a fetcher.
    ///
    /// `insecure_policy` skips signature policy enforcement on copy, the
    /// usual setting for local development images.
    pub fn new(insecure_policy: bool) -> Self {
        Self { insecure_policy }
    }

    /// Transport-prefixed image reference for a copy source
    fn transport(image: &str, source: FetchSource) -> String {
        match source {
            FetchSource::LocalStore => format!("docker-daemon:{}", image),
            FetchSource::RemoteRegistry => format!("docker://{}", image),
        }
    }
}

impl Default for SkopeoFetcher {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Fetcher for SkopeoFetcher {
    async fn probe_local(&self, image: &str, platform: &Platform) -> CairnResult<bool> {
        debug!("Probing local store for {} ({})", image, platform);

        let status = Command::new(SKOPEO)
            .args([
                "inspect",
                &Self::transport(image, FetchSource::LocalStore),
                "--override-os",
                &platform.os,
                "--override-arch",
                &platform.arch,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| spawn_error(SKOPEO, INSTALL_HINT, e))?;

        Ok(status.success())
    }

    async fn fetch(
        &self,
        image: &str,
        platform: &Platform,
        source: FetchSource,
        dest: &Path,
    ) -> CairnResult<()> {
        info!("Copying {} from {} ({})", image, source, platform);

        let mut args = vec!["copy".to_string()];
        if self.insecure_policy {
            args.push("--insecure-policy".to_string());
        }
        args.extend([
            "--override-os".to_string(),
            platform.os.clone(),
            "--override-arch".to_string(),
            platform.arch.clone(),
            "--dest-decompress".to_string(),
            Self::transport(image, source),
            format!("dir:{}", dest.display()),
        ]);

        debug!("Executing: skopeo {:?}", args);

        let mut child = Command::new(SKOPEO)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(SKOPEO, INSTALL_HINT, e))?;

        let output = stream_child_output(&mut child, &|line| debug!("skopeo: {}", line)).await;

        finish_child("skopeo copy", &mut child, &output)
            .await
            .map_err(|e| CairnError::FetchFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })
    }
}
