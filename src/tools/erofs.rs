//! mkfs.erofs-backed layer conversion and merging
//!
//! Each layer archive becomes a standalone EROFS fragment (tar input,
//! overlay whiteout convention). Fragments are then composed into one
//! overlay image, and every fragment's raw payload is appended after the
//! composed structure with a fixed-size chunked copy.

use crate::error::{CairnError, CairnResult};
use crate::tools::capability::{Converter, Merger};
use crate::tools::{finish_child, spawn_error, stream_child_output};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

const MKFS_EROFS: &str = "mkfs.erofs";
const INSTALL_HINT: &str = "Install erofs-utils (mkfs.erofs)";

/// Copy chunk for payload appends. Bounds peak memory regardless of layer
/// size.
const CHUNK_SIZE: usize = 1024 * 1024;

async fn run_mkfs(args: &[String]) -> CairnResult<()> {
    debug!("Executing: mkfs.erofs {:?}", args);

    let mut child = Command::new(MKFS_EROFS)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(MKFS_EROFS, INSTALL_HINT, e))?;

    let output = stream_child_output(&mut child, &|line| debug!("mkfs.erofs: {}", line)).await;
    finish_child("mkfs.erofs", &mut child, &output).await
}

/// Converter shelling out to mkfs.erofs in tar mode
pub struct ErofsConverter;

impl ErofsConverter {
    fn convert_args(layer: &Path, dest: &Path) -> Vec<String> {
        vec![
            // Read the layer as a tar stream rather than a directory tree
            "--tar=f".to_string(),
            // Keep aufs/overlay whiteout markers as deletions
            "--aufs".to_string(),
            "-Enoinline_data".to_string(),
            dest.display().to_string(),
            layer.display().to_string(),
        ]
    }
}

#[async_trait]
impl Converter for ErofsConverter {
    async fn convert(&self, layer: &Path, dest: &Path) -> CairnResult<()> {
        run_mkfs(&Self::convert_args(layer, dest)).await
    }
}

/// Merger shelling out to mkfs.erofs in overlay-compose mode
pub struct ErofsMerger;

impl ErofsMerger {
    fn merge_args(fragments: &[PathBuf], dest: &Path) -> Vec<String> {
        let mut args = vec![
            "--aufs".to_string(),
            "--ovlfs-strip=1".to_string(),
            dest.display().to_string(),
        ];
        args.extend(fragments.iter().map(|f| f.display().to_string()));
        args
    }
}

#[async_trait]
impl Merger for ErofsMerger {
    async fn merge(&self, fragments: &[PathBuf], dest: &Path) -> CairnResult<()> {
        if fragments.is_empty() {
            return Err(CairnError::MergeFailed {
                reason: "no layer fragments to merge".to_string(),
            });
        }
        run_mkfs(&Self::merge_args(fragments, dest)).await
    }
}

/// Append one fragment's raw payload bytes to the merged image.
///
/// Fixed-size chunked copy; the caller appends fragments in manifest order
/// and deletes each one afterwards.
pub async fn append_payload(target: &Path, fragment: &Path) -> CairnResult<()> {
    let fail = |context: String, e: std::io::Error| CairnError::MergeFailed {
        reason: format!("{}: {}", context, e),
    };

    let mut out = tokio::fs::OpenOptions::new()
        .append(true)
        .open(target)
        .await
        .map_err(|e| fail(format!("opening {}", target.display()), e))?;

    let mut input = tokio::fs::File::open(fragment)
        .await
        .map_err(|e| fail(format!("opening {}", fragment.display()), e))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = input
            .read(&mut buf)
            .await
            .map_err(|e| fail(format!("reading {}", fragment.display()), e))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .await
            .map_err(|e| fail(format!("appending to {}", target.display()), e))?;
    }

    out.flush()
        .await
        .map_err(|e| fail(format!("flushing {}", target.display()), e))
}
