//! Cache command - manage the layer cache

use crate::cache::{format_bytes, EntryMeta, EntryStatus, LayerCache};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::PlinthResult;
use crate::ui::{self, Notice, UiContext};
use chrono::Utc;
use console::style;
use serde::Serialize;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> PlinthResult<()> {
    let dir = ConfigManager::cache_dir(config);
    debug!("Using cache directory {}", dir.display());
    let cache = LayerCache::open(&dir).await?;

    match args.action {
        CacheAction::List { format } => list_entries(&cache, format).await,
        CacheAction::Info { fingerprint } => show_entry(&cache, &fingerprint).await,
        CacheAction::Gc { days, dry_run } => gc_entries(&cache, config, days, dry_run).await,
        CacheAction::Forget { fingerprint } => forget_entry(&cache, &fingerprint).await,
        CacheAction::Clear { yes } => clear_entries(&cache, yes).await,
    }
}

/// List cache entries
async fn list_entries(cache: &LayerCache, format: OutputFormat) -> PlinthResult<()> {
    let entries = cache.list().await;

    match format {
        OutputFormat::Json => print_entries_json(&entries)?,
        OutputFormat::Text if entries.is_empty() => println!("No cache entries found."),
        OutputFormat::Text => print_entries_table(&entries),
    }

    Ok(())
}

fn print_entries_table(entries: &[EntryMeta]) {
    println!(
        "{:<14} {:<14} {:<9} {:>10}  {:<16}",
        "FINGERPRINT", "STEP", "STATUS", "SIZE", "CREATED"
    );
    println!("{}", "-".repeat(68));

    for entry in entries {
        let status = match entry.status {
            EntryStatus::Success => style("success").green().to_string(),
            EntryStatus::Failure => style("failure").red().to_string(),
        };
        println!(
            "{:<14} {:<14} {:<9} {:>10}  {:<16}",
            entry.fingerprint.short(),
            entry.step,
            status,
            format_bytes(entry.size_bytes),
            entry.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    println!();
    println!("Total: {} entr(ies), {}", entries.len(), format_bytes(total));
}

#[derive(Serialize)]
struct EntryJson<'a> {
    fingerprint: String,
    step: &'a str,
    status: EntryStatus,
    size_bytes: u64,
    changes: usize,
    created_at: String,
}

fn print_entries_json(entries: &[EntryMeta]) -> PlinthResult<()> {
    let rows: Vec<EntryJson<'_>> = entries
        .iter()
        .map(|e| EntryJson {
            fingerprint: e.fingerprint.to_hex(),
            step: &e.step,
            status: e.status,
            size_bytes: e.size_bytes,
            changes: e.changes,
            created_at: e.created_at.to_rfc3339(),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

/// Show a single entry
async fn show_entry(cache: &LayerCache, prefix: &str) -> PlinthResult<()> {
    let ctx = UiContext::detect();
    let entry = cache.find(prefix).await?;

    let mut rows = vec![
        ("Fingerprint", entry.fingerprint.to_hex()),
        ("Step", entry.step.clone()),
        ("Status", entry.status.to_string()),
        (
            "Created",
            entry.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
    ];
    match &entry.failure {
        None => {
            rows.push(("Changes", entry.changes.to_string()));
            rows.push(("Size", format_bytes(entry.size_bytes)));
        }
        Some(failure) => {
            rows.push(("Kind", failure.kind.to_string()));
            rows.push(("Message", failure.message.clone()));
        }
    }
    ui::summary(&ctx, &rows);

    if entry.failure.is_some() {
        ui::notice(
            &ctx,
            Notice::Remark,
            &format!(
                "Run `plinth cache forget {}` to retry this step",
                entry.fingerprint.short()
            ),
            None,
        );
    }

    Ok(())
}

/// Remove entries older than the threshold
async fn gc_entries(
    cache: &LayerCache,
    config: &Config,
    days_override: Option<u32>,
    dry_run: bool,
) -> PlinthResult<()> {
    let gc_days = days_override.unwrap_or(config.cache.gc_days);

    if gc_days == 0 {
        println!("Cache GC is disabled (gc_days = 0)");
        return Ok(());
    }

    let stale = cache.stale(gc_days).await;
    if stale.is_empty() {
        println!("No cache entries older than {} days.", gc_days);
        return Ok(());
    }

    println!(
        "Found {} entr(ies) older than {} days:",
        stale.len(),
        gc_days
    );
    for entry in &stale {
        let age_days = (Utc::now() - entry.created_at).num_days();
        println!(
            "  {} {} {} ({} days old)",
            style("•").red(),
            entry.fingerprint.short(),
            entry.step,
            age_days
        );
    }

    if dry_run {
        println!();
        println!("Dry run - no entries removed.");
        return Ok(());
    }

    let removed = cache.gc(gc_days).await?;
    println!();
    println!("{} Removed {} entr(ies)", style("✓").green(), removed);

    Ok(())
}

/// Forget one entry
async fn forget_entry(cache: &LayerCache, prefix: &str) -> PlinthResult<()> {
    let entry = cache.find(prefix).await?;
    cache.remove(&entry.fingerprint).await?;
    println!(
        "{} Forgot {} ({}, {})",
        style("✓").green(),
        entry.fingerprint.short(),
        entry.step,
        entry.status
    );
    Ok(())
}

/// Remove every entry
async fn clear_entries(cache: &LayerCache, yes: bool) -> PlinthResult<()> {
    let count = cache.len().await;
    if count == 0 {
        println!("No cache entries to clear.");
        return Ok(());
    }

    let ctx = UiContext::detect().with_auto_yes(yes);
    let prompt = format!(
        "Remove {} cache entr(ies) ({})?",
        count,
        format_bytes(cache.total_size().await)
    );
    if !ui::confirm(&ctx, &prompt, false).await? {
        println!("Aborted. Pass --yes to clear without prompting.");
        return Ok(());
    }

    let removed = cache.clear().await?;
    println!("{} Cleared {} entr(ies)", style("✓").green(), removed);

    Ok(())
}
