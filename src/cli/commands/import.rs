//! `dicom-index import` command - Index DICOM files and directories

use console::style;
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::cli::args::GlobalOpts;
use crate::cli::helpers::open_database;
use crate::core::{DicomDatabase, IngestSession, InsertOptions, InsertOutcome, Tag};

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// Files or directories to index (directories are walked recursively)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Index files where they are instead of copying them into the store
    #[arg(long)]
    pub no_store: bool,

    /// Skip thumbnail generation
    #[arg(long)]
    pub no_thumbnails: bool,

    /// Tag to warm in the attribute cache (repeatable, e.g. 0010,0010)
    #[arg(long = "precache", value_name = "TAG")]
    pub precache: Vec<Tag>,

    /// Stop at the first file that cannot be indexed
    #[arg(long)]
    pub fail_fast: bool,
}

/// Import statistics
#[derive(Default)]
struct ImportStats {
    files_seen: usize,
    inserted: usize,
    superseded: usize,
    unchanged: usize,
    failed: usize,
}

pub fn run(args: ImportArgs, global: &GlobalOpts) -> Result<()> {
    let mut db = open_database(global)?;
    if !args.precache.is_empty() {
        let mut tags = db.tags_to_precache().to_vec();
        for tag in &args.precache {
            if !tags.contains(tag) {
                tags.push(*tag);
            }
        }
        db.set_tags_to_precache(tags);
    }

    let mut options = InsertOptions::from_config(db.config());
    if args.no_store {
        options.store_file = false;
    }
    if args.no_thumbnails {
        options.generate_thumbnail = false;
    }

    let mut session = IngestSession::new();
    let mut stats = ImportStats::default();

    for root in &args.paths {
        if !root.exists() {
            return Err(miette::miette!("No such file or directory: {}", root.display()));
        }
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            import_one(&mut db, &mut session, entry.path(), options, &mut stats, global);
            if args.fail_fast && stats.failed > 0 {
                return Err(miette::miette!(
                    "import stopped: {}",
                    db.last_error().unwrap_or("unknown error")
                ));
            }
        }
    }

    if !global.quiet {
        println!(
            "{} Indexed {} of {} file(s) into {}",
            style("✓").green(),
            style(stats.inserted).cyan(),
            stats.files_seen,
            db.database_filename().display()
        );
        if stats.superseded > 0 {
            println!("  Replaced:  {}", style(stats.superseded).yellow());
        }
        if stats.unchanged > 0 {
            println!("  Unchanged: {}", stats.unchanged);
        }
        if stats.failed > 0 {
            println!("  Failed:    {}", style(stats.failed).red());
        }
    }

    db.close().into_diagnostic()?;
    Ok(())
}

fn import_one(
    db: &mut DicomDatabase,
    session: &mut IngestSession,
    path: &Path,
    options: InsertOptions,
    stats: &mut ImportStats,
    global: &GlobalOpts,
) {
    stats.files_seen += 1;
    match db.insert_file(session, path, options) {
        Ok(InsertOutcome::Inserted { superseded, sop_instance_uid, .. }) => {
            stats.inserted += 1;
            if superseded {
                stats.superseded += 1;
            }
            if global.verbose {
                println!("  {} {} ({})", style("+").green(), path.display(), sop_instance_uid);
            }
        }
        Ok(InsertOutcome::Unchanged) => stats.unchanged += 1,
        Err(e) => {
            stats.failed += 1;
            if !global.quiet {
                eprintln!("{} {}: {}", style("✗").red(), path.display(), e);
            }
        }
    }
}
