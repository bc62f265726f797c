//! `dicom-index cache` command - Manage the attribute cache
//!
//! The cache is a SQLite file next to the index that remembers attribute
//! values per instance so lookups do not re-read DICOM files. It is safe to
//! clear at any time; values are read again on demand.

use clap::Subcommand;
use console::style;
use miette::{IntoDiagnostic, Result};

use crate::cli::args::{GlobalOpts, OutputFormat};
use crate::cli::helpers::open_database;

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show index and cache statistics
    Status,

    /// Forget every cached value
    Clear,
}

pub fn run(cmd: CacheCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        CacheCommands::Status => run_status(global),
        CacheCommands::Clear => run_clear(global),
    }
}

fn run_status(global: &GlobalOpts) -> Result<()> {
    let mut db = open_database(global)?;
    let stats = db.statistics();

    if global.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&stats).into_diagnostic()?);
        return Ok(());
    }

    let cache_location = db
        .tag_cache()
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(in memory)".to_string());

    println!("{}", style("Cache Status").bold());
    println!("{}", style("─".repeat(40)).dim());
    println!("  Index:        {}", db.database_filename().display());
    println!("  Tag cache:    {}", cache_location);
    println!("  Patients:     {}", style(stats.patients).cyan());
    println!("  Studies:      {}", style(stats.studies).cyan());
    println!("  Series:       {}", style(stats.series).cyan());
    println!("  Instances:    {}", style(stats.images).cyan());
    println!("  Cached tags:  {}", style(stats.cached_tags).cyan());

    let precache = db.tags_to_precache();
    if !precache.is_empty() {
        let tags: Vec<String> = precache.iter().map(|t| t.to_string()).collect();
        println!("  Precached:    {}", tags.join(" "));
    }

    Ok(())
}

fn run_clear(global: &GlobalOpts) -> Result<()> {
    let mut db = open_database(global)?;
    let before = db.tag_cache().entry_count();
    db.tag_cache().clear().into_diagnostic()?;

    if !global.quiet {
        println!(
            "{} Cleared {} cached value(s)",
            style("✓").green(),
            style(before).cyan()
        );
    }
    Ok(())
}
