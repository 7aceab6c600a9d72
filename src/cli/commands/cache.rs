//! Cache command - inspect and clean the image cache

use crate::cache::{entry::format_bytes, CacheState, CacheStore, EntryInfo};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::{CairnError, CairnResult};
use console::style;
use std::io::{self, BufRead, Write};

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> CairnResult<()> {
    let store = CacheStore::new(config.cache_root()?);

    match args.action {
        CacheAction::List { format } => list_entries(&store, format).await,
        CacheAction::Clear { yes } => clear_entries(&store, yes).await,
    }
}

/// List all cache entries
async fn list_entries(store: &CacheStore, format: OutputFormat) -> CairnResult<()> {
    let entries = store.list().await?;

    if entries.is_empty() {
        println!("No cached images.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(&entries),
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Plain => print_plain(&entries),
    }

    Ok(())
}

fn print_table(entries: &[EntryInfo]) {
    println!(
        "{:<14} {:<14} {:<10} {:<10} {:<17}",
        "KEY", "PLATFORM", "STATE", "SIZE", "MODIFIED"
    );
    println!("{}", "-".repeat(68));

    for entry in entries {
        let state_display = match entry.state {
            CacheState::Complete => style("complete").green().to_string(),
            CacheState::Building => style("building").yellow().to_string(),
        };

        let modified = entry
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<14} {:<14} {:<10} {:<10} {:<17}",
            short_key(&entry.key),
            entry.platform.as_deref().unwrap_or("-"),
            state_display,
            format_bytes(entry.size_bytes),
            modified
        );
    }

    println!();
    println!("Total: {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
}

fn print_json(entries: &[EntryInfo]) -> CairnResult<()> {
    #[derive(serde::Serialize)]
    struct EntryJson {
        key: String,
        platform: Option<String>,
        state: String,
        size_bytes: u64,
        modified: Option<String>,
    }

    let json_entries: Vec<EntryJson> = entries
        .iter()
        .map(|e| EntryJson {
            key: e.key.clone(),
            platform: e.platform.clone(),
            state: e.state.to_string(),
            size_bytes: e.size_bytes,
            modified: e.modified.map(|m| m.to_rfc3339()),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json_entries)?);
    Ok(())
}

fn print_plain(entries: &[EntryInfo]) {
    for entry in entries {
        println!("{}", entry.key);
    }
}

fn short_key(key: &str) -> &str {
    &key[..12.min(key.len())]
}

/// Remove every cache entry after confirmation
async fn clear_entries(store: &CacheStore, yes: bool) -> CairnResult<()> {
    let entries = store.list().await?;

    if entries.is_empty() {
        println!("Cache is already empty.");
        return Ok(());
    }

    let total_bytes: u64 = entries.iter().map(|e| e.size_bytes).sum();

    if !yes && !confirm(&format!(
        "Remove {} cached image(s), freeing {}? [y/N] ",
        entries.len(),
        format_bytes(total_bytes)
    ))? {
        println!("Aborted.");
        return Ok(());
    }

    store.clear().await?;
    println!(
        "{} Removed {} entr{} ({})",
        style("✓").green(),
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" },
        format_bytes(total_bytes)
    );
    Ok(())
}

fn confirm(prompt: &str) -> CairnResult<bool> {
    eprint!("{}", prompt);
    io::stderr()
        .flush()
        .map_err(|e| CairnError::io("flushing prompt", e))?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| CairnError::io("reading confirmation", e))?;

    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}
