//! The image acquisition pipeline
//!
//! Fetch → verify platform → convert layers → merge → publish, wrapped in
//! create-or-reuse cache semantics. Every step blocks until its tool
//! finishes; any failure is fatal to the run and the cleanup guard removes
//! the entry so the next invocation starts clean.

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::error::{CairnError, CairnResult};
use crate::image::{ImageConfig, ImageManifest, Platform};
use crate::tools::capability::{Converter, FetchSource, Fetcher, Merger};
use crate::tools::erofs::append_payload;
use std::path::PathBuf;
use tracing::{debug, info};

/// One acquisition request
#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// Requested platform
    pub platform: Platform,
    /// Image reference, e.g. "alpine:3.18"
    pub image: String,
}

/// Progress notifications emitted during a run, for CLI display
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Copying the image from its source
    Fetching { image: String, source: FetchSource },
    /// Converting layer `index` of `total` (zero-based, manifest order)
    Converting {
        index: usize,
        total: usize,
        digest: String,
    },
    /// Composing fragments into the final image
    Merging { total: usize },
    /// Renaming the merged image to its canonical name
    Publishing,
}

/// The fetch/convert/merge pipeline over injected tool capabilities
pub struct ImagePipeline<'a> {
    store: CacheStore,
    fetcher: &'a dyn Fetcher,
    converter: &'a dyn Converter,
    merger: &'a dyn Merger,
    prefer_local: bool,
}

impl<'a> ImagePipeline<'a> {
    /// Create a pipeline over a cache store and tool implementations
    pub fn new(
        store: CacheStore,
        fetcher: &'a dyn Fetcher,
        converter: &'a dyn Converter,
        merger: &'a dyn Merger,
        prefer_local: bool,
    ) -> Self {
        Self {
            store,
            fetcher,
            converter,
            merger,
            prefer_local,
        }
    }

    /// Acquire the artifact for a request, reusing the cache when possible.
    ///
    /// Returns the canonical artifact path. On a cache hit no fetch or
    /// conversion work happens. With `refresh`, an existing entry is
    /// destroyed and the pipeline re-runs from scratch.
    pub async fn acquire(
        &self,
        request: &ImageRequest,
        refresh: bool,
        on_event: &(dyn Fn(PipelineEvent) + Send + Sync),
    ) -> CairnResult<PathBuf> {
        let key = CacheKey::for_image(&request.platform, &request.image)?;
        debug!("Cache key for {} ({}): {}", request.image, request.platform, key);

        let entry = self.store.entry(&key);
        entry.acquire(refresh).await?;

        if entry.is_complete() {
            info!("Cache hit for {} ({})", request.image, request.platform);
            return Ok(entry.artifact_path());
        }

        // Remove the entry on any failure below; disarmed only after the
        // artifact is durably published.
        let mut guard = entry.cleanup_guard();
        let artifact = self.run(request, &entry, on_event).await?;
        guard.disarm();

        Ok(artifact)
    }

    async fn run(
        &self,
        request: &ImageRequest,
        entry: &CacheEntry,
        on_event: &(dyn Fn(PipelineEvent) + Send + Sync),
    ) -> CairnResult<PathBuf> {
        let layers_dir = entry.layers_dir();

        // Fetch, preferring the local image store when it has the image
        let source = if self.prefer_local
            && self
                .fetcher
                .probe_local(&request.image, &request.platform)
                .await?
        {
            FetchSource::LocalStore
        } else {
            FetchSource::RemoteRegistry
        };

        on_event(PipelineEvent::Fetching {
            image: request.image.clone(),
            source,
        });
        self.fetcher
            .fetch(&request.image, &request.platform, source, &layers_dir)
            .await
            .map_err(|e| match e {
                CairnError::FetchFailed { .. } => e,
                other => CairnError::FetchFailed {
                    image: request.image.clone(),
                    reason: other.to_string(),
                },
            })?;

        // Reject images whose config declares a different platform than
        // requested; registries can misresolve multi-arch lists.
        let manifest = ImageManifest::from_dir(&layers_dir).await?;
        let config_blob = manifest.config.blob_path(&layers_dir)?;
        let image_config = ImageConfig::from_file(&config_blob).await?;
        info!(
            "Fetched image from {} reports {}/{}",
            source, image_config.os, image_config.architecture
        );
        request.platform.verify(&image_config)?;

        // Convert each layer in manifest order; drop the source archive as
        // soon as its fragment exists to bound peak disk usage
        let total = manifest.layers.len();
        let mut fragments = Vec::with_capacity(total);
        for (index, layer) in manifest.layers.iter().enumerate() {
            let digest = layer.digest_hex()?.to_string();
            on_event(PipelineEvent::Converting {
                index,
                total,
                digest: digest.clone(),
            });

            let blob = layer.blob_path(&layers_dir)?;
            let fragment = blob.with_extension("erofs");
            self.converter
                .convert(&blob, &fragment)
                .await
                .map_err(|e| CairnError::ConversionFailed {
                    digest: digest.clone(),
                    reason: e.to_string(),
                })?;

            tokio::fs::remove_file(&blob)
                .await
                .map_err(|e| CairnError::io(format!("removing layer blob {}", blob.display()), e))?;
            fragments.push(fragment);
        }

        // Phase a: compose fragments into one overlay image at the tmp name
        on_event(PipelineEvent::Merging { total });
        let tmp = entry.artifact_tmp_path();
        self.merger
            .merge(&fragments, &tmp)
            .await
            .map_err(|e| match e {
                CairnError::MergeFailed { .. } => e,
                other => CairnError::MergeFailed {
                    reason: other.to_string(),
                },
            })?;

        // Phase b: append each fragment's payload in the same order
        for fragment in &fragments {
            append_payload(&tmp, fragment).await?;
            tokio::fs::remove_file(fragment).await.map_err(|e| {
                CairnError::io(format!("removing fragment {}", fragment.display()), e)
            })?;
        }

        // Keep the image config, drop the working directory, publish
        on_event(PipelineEvent::Publishing);
        tokio::fs::rename(&config_blob, entry.config_path())
            .await
            .map_err(|e| CairnError::io("keeping image config", e))?;
        tokio::fs::remove_dir_all(&layers_dir)
            .await
            .map_err(|e| CairnError::io(format!("removing {}", layers_dir.display()), e))?;

        entry.publish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const NOOP: &(dyn Fn(PipelineEvent) + Send + Sync) = &|_| {};

    fn request(image: &str) -> ImageRequest {
        ImageRequest {
            platform: Platform::parse("linux/amd64").unwrap(),
            image: image.to_string(),
        }
    }

    /// Fetcher writing a synthetic dir: layout
    struct FakeFetcher {
        os: String,
        arch: String,
        layers: Vec<(&'static str, &'static [u8])>,
        in_local_store: bool,
        fail: bool,
        probes: AtomicUsize,
        fetches: AtomicUsize,
        last_source: Mutex<Option<FetchSource>>,
    }

    impl FakeFetcher {
        fn new(layers: Vec<(&'static str, &'static [u8])>) -> Self {
            Self {
                os: "linux".to_string(),
                arch: "amd64".to_string(),
                layers,
                in_local_store: false,
                fail: false,
                probes: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
                last_source: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn probe_local(&self, _image: &str, _platform: &Platform) -> CairnResult<bool> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(self.in_local_store)
        }

        async fn fetch(
            &self,
            image: &str,
            _platform: &Platform,
            source: FetchSource,
            dest: &Path,
        ) -> CairnResult<()> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            *self.last_source.lock().unwrap() = Some(source);

            if self.fail {
                return Err(CairnError::FetchFailed {
                    image: image.to_string(),
                    reason: "simulated".to_string(),
                });
            }

            std::fs::create_dir_all(dest).unwrap();

            let layer_entries: Vec<String> = self
                .layers
                .iter()
                .map(|(digest, _)| format!(r#"{{"digest": "sha256:{}"}}"#, digest))
                .collect();
            std::fs::write(
                dest.join("manifest.json"),
                format!(
                    r#"{{"config": {{"digest": "sha256:cfg"}}, "layers": [{}]}}"#,
                    layer_entries.join(", ")
                ),
            )
            .unwrap();

            std::fs::write(
                dest.join("cfg"),
                format!(r#"{{"os": "{}", "architecture": "{}"}}"#, self.os, self.arch),
            )
            .unwrap();

            for (digest, content) in &self.layers {
                std::fs::write(dest.join(digest), content).unwrap();
            }
            Ok(())
        }
    }

    /// Converter recording source blob names, emitting fake fragments
    struct FakeConverter {
        converted: Mutex<Vec<String>>,
    }

    impl FakeConverter {
        fn new() -> Self {
            Self {
                converted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Converter for FakeConverter {
        async fn convert(&self, layer: &Path, dest: &Path) -> CairnResult<()> {
            let name = layer.file_name().unwrap().to_string_lossy().into_owned();
            self.converted.lock().unwrap().push(name);

            let payload = std::fs::read(layer).unwrap();
            let mut content = b"EROFS:".to_vec();
            content.extend_from_slice(&payload);
            std::fs::write(dest, content).unwrap();
            Ok(())
        }
    }

    /// Merger recording fragment order and checking blob cleanup
    struct FakeMerger {
        fail: bool,
        /// Delete the first fragment after composing, so the append phase
        /// that follows blows up mid-way
        sabotage_append: bool,
        merges: AtomicUsize,
        merged_order: Mutex<Vec<String>>,
        saw_leftover_blob: AtomicBool,
    }

    impl FakeMerger {
        fn new() -> Self {
            Self {
                fail: false,
                sabotage_append: false,
                merges: AtomicUsize::new(0),
                merged_order: Mutex::new(Vec::new()),
                saw_leftover_blob: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Merger for FakeMerger {
        async fn merge(&self, fragments: &[PathBuf], dest: &Path) -> CairnResult<()> {
            self.merges.fetch_add(1, Ordering::SeqCst);

            if self.fail {
                return Err(CairnError::MergeFailed {
                    reason: "simulated".to_string(),
                });
            }

            let mut merged = b"MERGED".to_vec();
            for fragment in fragments {
                self.merged_order.lock().unwrap().push(
                    fragment.file_name().unwrap().to_string_lossy().into_owned(),
                );
                // The consumed source archives must be gone by merge time
                if fragment.with_extension("").exists() {
                    self.saw_leftover_blob.store(true, Ordering::SeqCst);
                }
                merged.extend_from_slice(&std::fs::read(fragment).unwrap());
            }
            std::fs::write(dest, merged).unwrap();

            if self.sabotage_append {
                std::fs::remove_file(&fragments[0]).unwrap();
            }
            Ok(())
        }
    }

    struct Rig {
        _root: TempDir,
        store: CacheStore,
        fetcher: FakeFetcher,
        converter: FakeConverter,
        merger: FakeMerger,
    }

    impl Rig {
        fn new(layers: Vec<(&'static str, &'static [u8])>) -> Self {
            let root = TempDir::new().unwrap();
            let store = CacheStore::new(root.path());
            Self {
                _root: root,
                store,
                fetcher: FakeFetcher::new(layers),
                converter: FakeConverter::new(),
                merger: FakeMerger::new(),
            }
        }

        fn pipeline(&self) -> ImagePipeline<'_> {
            ImagePipeline::new(
                self.store.clone(),
                &self.fetcher,
                &self.converter,
                &self.merger,
                true,
            )
        }
    }

    #[tokio::test]
    async fn end_to_end_publishes_artifact() {
        let rig = Rig::new(vec![("layer0", b"aaa"), ("layer1", b"bbb")]);
        let req = request("alpine:3.18");

        let artifact = rig.pipeline().acquire(&req, false, NOOP).await.unwrap();

        assert!(artifact.is_file());
        assert!(artifact.ends_with("image.erofs"));
        // Merged structure first, then the payloads in order
        let content = std::fs::read(&artifact).unwrap();
        assert!(content.starts_with(b"MERGED"));

        let entry_dir = artifact.parent().unwrap();
        assert!(entry_dir.join("config.json").is_file());
        assert!(!entry_dir.join("layers").exists());
        assert!(!entry_dir.join("image.erofs.tmp").exists());
    }

    #[tokio::test]
    async fn second_acquire_is_a_cache_hit() {
        let rig = Rig::new(vec![("layer0", b"aaa")]);
        let req = request("alpine:3.18");
        let pipeline = rig.pipeline();

        let first = pipeline.acquire(&req, false, NOOP).await.unwrap();
        let second = pipeline.acquire(&req, false, NOOP).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(rig.fetcher.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(rig.converter.converted.lock().unwrap().len(), 1);
        assert_eq!(rig.merger.merges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_always_reruns() {
        let rig = Rig::new(vec![("layer0", b"aaa")]);
        let req = request("alpine:3.18");
        let pipeline = rig.pipeline();

        pipeline.acquire(&req, false, NOOP).await.unwrap();
        pipeline.acquire(&req, true, NOOP).await.unwrap();

        assert_eq!(rig.fetcher.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(rig.merger.merges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_requests_get_distinct_entries() {
        let rig = Rig::new(vec![("layer0", b"aaa")]);
        let pipeline = rig.pipeline();

        let a = pipeline
            .acquire(&request("alpine:3.18"), false, NOOP)
            .await
            .unwrap();
        let b = pipeline
            .acquire(&request("alpine:3.19"), false, NOOP)
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(rig.fetcher.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn layer_order_flows_through_convert_and_merge() {
        let rig = Rig::new(vec![
            ("layer0", b"aaa"),
            ("layer1", b"bbb"),
            ("layer2", b"ccc"),
        ]);

        rig.pipeline()
            .acquire(&request("alpine:3.18"), false, NOOP)
            .await
            .unwrap();

        assert_eq!(
            *rig.converter.converted.lock().unwrap(),
            vec!["layer0", "layer1", "layer2"]
        );
        assert_eq!(
            *rig.merger.merged_order.lock().unwrap(),
            vec!["layer0.erofs", "layer1.erofs", "layer2.erofs"]
        );
    }

    #[tokio::test]
    async fn source_blobs_removed_before_merge() {
        let rig = Rig::new(vec![("layer0", b"aaa"), ("layer1", b"bbb")]);

        rig.pipeline()
            .acquire(&request("alpine:3.18"), false, NOOP)
            .await
            .unwrap();

        assert!(!rig.merger.saw_leftover_blob.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn platform_mismatch_aborts_and_cleans() {
        let mut rig = Rig::new(vec![("layer0", b"aaa")]);
        rig.fetcher.os = "windows".to_string();
        let req = request("alpine:3.18");

        let err = rig.pipeline().acquire(&req, false, NOOP).await.unwrap_err();
        assert!(matches!(err, CairnError::PlatformMismatch { .. }));

        // No conversion was attempted, no entry left behind
        assert!(rig.converter.converted.lock().unwrap().is_empty());
        assert!(store_is_empty(&rig.store));
    }

    #[tokio::test]
    async fn merge_failure_leaves_no_artifact() {
        let mut rig = Rig::new(vec![("layer0", b"aaa")]);
        rig.merger.fail = true;
        let req = request("alpine:3.18");

        let err = rig.pipeline().acquire(&req, false, NOOP).await.unwrap_err();
        assert!(matches!(err, CairnError::MergeFailed { .. }));
        assert!(store_is_empty(&rig.store));
    }

    #[tokio::test]
    async fn append_failure_leaves_no_artifact() {
        let mut rig = Rig::new(vec![("layer0", b"aaa"), ("layer1", b"bbb")]);
        rig.merger.sabotage_append = true;
        let req = request("alpine:3.18");

        let err = rig.pipeline().acquire(&req, false, NOOP).await.unwrap_err();
        assert!(matches!(err, CairnError::MergeFailed { .. }));
        assert!(store_is_empty(&rig.store));
    }

    #[tokio::test]
    async fn fetch_failure_cleans_entry() {
        let mut rig = Rig::new(vec![("layer0", b"aaa")]);
        rig.fetcher.fail = true;

        let err = rig
            .pipeline()
            .acquire(&request("alpine:3.18"), false, NOOP)
            .await
            .unwrap_err();
        assert!(matches!(err, CairnError::FetchFailed { .. }));
        assert!(store_is_empty(&rig.store));
    }

    #[tokio::test]
    async fn failed_run_recovers_on_retry() {
        let mut rig = Rig::new(vec![("layer0", b"aaa")]);
        rig.merger.fail = true;
        let req = request("alpine:3.18");

        rig.pipeline().acquire(&req, false, NOOP).await.unwrap_err();

        rig.merger.fail = false;
        let artifact = rig.pipeline().acquire(&req, false, NOOP).await.unwrap();
        assert!(artifact.is_file());
    }

    #[tokio::test]
    async fn local_store_preferred_when_probed() {
        let mut rig = Rig::new(vec![("layer0", b"aaa")]);
        rig.fetcher.in_local_store = true;

        rig.pipeline()
            .acquire(&request("alpine:3.18"), false, NOOP)
            .await
            .unwrap();

        assert_eq!(rig.fetcher.probes.load(Ordering::SeqCst), 1);
        assert_eq!(
            *rig.fetcher.last_source.lock().unwrap(),
            Some(FetchSource::LocalStore)
        );
    }

    #[tokio::test]
    async fn remote_when_not_in_local_store() {
        let rig = Rig::new(vec![("layer0", b"aaa")]);

        rig.pipeline()
            .acquire(&request("alpine:3.18"), false, NOOP)
            .await
            .unwrap();

        assert_eq!(
            *rig.fetcher.last_source.lock().unwrap(),
            Some(FetchSource::RemoteRegistry)
        );
    }

    #[tokio::test]
    async fn prefer_local_disabled_skips_probe() {
        let mut rig = Rig::new(vec![("layer0", b"aaa")]);
        rig.fetcher.in_local_store = true;

        let pipeline = ImagePipeline::new(
            rig.store.clone(),
            &rig.fetcher,
            &rig.converter,
            &rig.merger,
            false,
        );
        pipeline
            .acquire(&request("alpine:3.18"), false, NOOP)
            .await
            .unwrap();

        assert_eq!(rig.fetcher.probes.load(Ordering::SeqCst), 0);
        assert_eq!(
            *rig.fetcher.last_source.lock().unwrap(),
            Some(FetchSource::RemoteRegistry)
        );
    }

    #[tokio::test]
    async fn events_report_layer_progress() {
        let rig = Rig::new(vec![("layer0", b"aaa"), ("layer1", b"bbb")]);
        let events = Mutex::new(Vec::new());

        rig.pipeline()
            .acquire(&request("alpine:3.18"), false, &|e| {
                events.lock().unwrap().push(e)
            })
            .await
            .unwrap();

        let events = events.into_inner().unwrap();
        let converting: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Converting { index, total, digest } => {
                    Some((*index, *total, digest.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            converting,
            vec![
                (0, 2, "layer0".to_string()),
                (1, 2, "layer1".to_string()),
            ]
        );
        assert!(matches!(events.first(), Some(PipelineEvent::Fetching { .. })));
        assert!(matches!(events.last(), Some(PipelineEvent::Publishing)));
    }

    fn store_is_empty(store: &CacheStore) -> bool {
        match std::fs::read_dir(store.images_dir()) {
            Ok(mut dir) => dir.next().is_none(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(_) => false,
        }
    }
}
