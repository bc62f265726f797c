//! `dicom-index schema` command - Schema version and rebuild

use clap::Subcommand;
use console::style;
use miette::{IntoDiagnostic, Result};

use crate::cli::args::{GlobalOpts, OutputFormat};
use crate::cli::helpers::open_database;
use crate::core::{DicomDatabase, DicomFileReader, Schema};

#[derive(Subcommand, Debug)]
pub enum SchemaCommands {
    /// Show the stored and expected schema versions
    Status,

    /// Rebuild the index under the current schema, re-reading every file
    Update {
        /// Rebuild even when the versions already match
        #[arg(long)]
        force: bool,
    },
}

pub fn run(cmd: SchemaCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        SchemaCommands::Status => run_status(global),
        SchemaCommands::Update { force } => run_update(force, global),
    }
}

fn run_status(global: &GlobalOpts) -> Result<()> {
    let db = DicomDatabase::open(global.db.as_path(), Box::new(DicomFileReader::new()))
        .into_diagnostic()?;
    let loaded = db.schema_version_loaded();
    let needed = db.schema_update_needed();

    if global.format == OutputFormat::Json {
        let status = serde_json::json!({
            "database": db.database_filename(),
            "loaded": loaded,
            "current": db.schema_version(),
            "update_needed": needed,
        });
        println!("{}", serde_json::to_string_pretty(&status).into_diagnostic()?);
        return Ok(());
    }

    println!("{}", style("Schema Status").bold());
    println!("{}", style("─".repeat(40)).dim());
    println!("  Database: {}", db.database_filename().display());
    println!("  Loaded:   {}", loaded.as_deref().unwrap_or("(none)"));
    println!("  Current:  {}", db.schema_version());
    if needed {
        println!("  {} run `dicom-index schema update`", style("Update needed:").yellow());
    } else {
        println!("  {}", style("Up to date").green());
    }
    Ok(())
}

fn run_update(force: bool, global: &GlobalOpts) -> Result<()> {
    let mut db = open_database(global)?;
    let verbose = global.verbose;
    let mut progress = |index: usize, file: &str| {
        if verbose {
            println!("  [{}] {}", index + 1, file);
        }
    };

    let report = if force {
        Some(db.update_schema(&Schema::CURRENT, Some(&mut progress)).into_diagnostic()?)
    } else {
        db.update_schema_if_needed(Some(&mut progress)).into_diagnostic()?
    };

    let Some(report) = report else {
        if !global.quiet {
            println!("{} Schema is up to date ({})", style("✓").green(), db.schema_version());
        }
        return Ok(());
    };

    if !global.quiet {
        println!(
            "{} Rebuilt index at schema {}: {} of {} file(s) re-indexed",
            style("✓").green(),
            db.schema_version(),
            style(report.reinserted).cyan(),
            report.total
        );
    }
    for (file, reason) in &report.failed {
        eprintln!("{} {}: {}", style("✗").red(), file, reason);
    }
    if !report.is_complete() {
        return Err(miette::miette!(
            "{} file(s) could not be re-indexed; re-import them to restore the index",
            report.failed.len()
        ));
    }
    db.close().into_diagnostic()?;
    Ok(())
}
