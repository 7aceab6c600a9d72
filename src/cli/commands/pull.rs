//! Pull command - fetch an image and build its disk artifact
//!
//! The only stdout output is the artifact path, printed on success. All
//! diagnostics and progress go to stderr so callers can consume the path
//! programmatically.

use crate::cache::CacheStore;
use crate::cli::args::PullArgs;
use crate::config::Config;
use crate::error::CairnResult;
use crate::image::Platform;
use crate::pipeline::{ImagePipeline, ImageRequest, PipelineEvent};
use crate::tools::{ErofsConverter, ErofsMerger, SkopeoFetcher};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::debug;

/// Execute the pull command
pub async fn execute(args: PullArgs, config: &Config) -> CairnResult<()> {
    let platform_str = args
        .platform
        .unwrap_or_else(|| config.image.platform.clone());
    let platform = Platform::parse(&platform_str)?;
    let image = args
        .image
        .unwrap_or_else(|| config.image.reference.clone());

    let store = CacheStore::new(config.cache_root()?);
    debug!("Cache store at {}", store.images_dir().display());

    let fetcher = SkopeoFetcher::new(config.fetch.insecure_policy);
    let converter = ErofsConverter;
    let merger = ErofsMerger;
    let pipeline = ImagePipeline::new(
        store,
        &fetcher,
        &converter,
        &merger,
        config.fetch.prefer_local,
    );

    let request = ImageRequest {
        platform,
        image: image.clone(),
    };

    let progress = create_progress_bar();
    let artifact = pipeline
        .acquire(&request, args.refresh, &|event| {
            progress.set_message(describe_event(&event))
        })
        .await;
    progress.finish_and_clear();
    let artifact = artifact?;

    eprintln!(
        "{} {} ({}) ready",
        style("✓").green(),
        style(&image).cyan(),
        request.platform
    );
    println!("{}", artifact.display());
    Ok(())
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn describe_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::Fetching { image, source } => {
            format!("Fetching {} from {}...", image, source)
        }
        PipelineEvent::Converting {
            index,
            total,
            digest,
        } => format!(
            "Converting layer {}/{} ({})...",
            index + 1,
            total,
            &digest[..12.min(digest.len())]
        ),
        PipelineEvent::Merging { total } => format!("Merging {} layers...", total),
        PipelineEvent::Publishing => "Publishing artifact...".to_string(),
    }
}
