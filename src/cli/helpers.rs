//! Shared helper functions for CLI commands

use miette::{IntoDiagnostic, Result};

use crate::cli::args::GlobalOpts;
use crate::core::{DicomDatabase, DicomFileReader};

/// Open the index selected by `--db` with the default DICOM reader
pub fn open_database(global: &GlobalOpts) -> Result<DicomDatabase> {
    let db = DicomDatabase::open(global.db.as_path(), Box::new(DicomFileReader::new())).into_diagnostic()?;
    if db.schema_update_needed() && !global.quiet {
        eprintln!(
            "{} index schema {} is out of date (current {}), run `dicom-index schema update`",
            console::style("!").yellow(),
            db.schema_version_loaded().unwrap_or_else(|| "?".to_string()),
            db.schema_version()
        );
    }
    Ok(db)
}

/// Truncate a string to max_len characters, adding "..." if truncated
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
