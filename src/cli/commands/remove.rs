//! `dicom-index remove` command - Remove entries and their managed copies

use clap::Subcommand;
use console::style;
use miette::{IntoDiagnostic, Result};

use crate::cli::args::GlobalOpts;
use crate::cli::helpers::open_database;

#[derive(Subcommand, Debug)]
pub enum RemoveCommands {
    /// Remove a patient and everything below it
    Patient {
        /// Patient UID as shown by `ls patients`
        uid: i64,
    },

    /// Remove a study and everything below it
    Study {
        /// StudyInstanceUID
        uid: String,
    },

    /// Remove a series and its instances
    Series {
        /// SeriesInstanceUID
        uid: String,
    },

    /// Remove a single instance
    Instance {
        /// SOPInstanceUID
        uid: String,
    },
}

pub fn run(cmd: RemoveCommands, global: &GlobalOpts) -> Result<()> {
    let mut db = open_database(global)?;

    let (what, removed) = match &cmd {
        RemoveCommands::Patient { uid } => ("patient", db.remove_patient(*uid).into_diagnostic()?),
        RemoveCommands::Study { uid } => ("study", db.remove_study(uid).into_diagnostic()?),
        RemoveCommands::Series { uid } => ("series", db.remove_series(uid).into_diagnostic()?),
        RemoveCommands::Instance { uid } => (
            "instance",
            usize::from(db.remove_instance(uid).into_diagnostic()?),
        ),
    };

    if removed == 0 {
        return Err(miette::miette!("Nothing indexed for that {}", what));
    }
    if !global.quiet {
        println!(
            "{} Removed {} instance(s) for {}",
            style("✓").green(),
            style(removed).cyan(),
            what
        );
    }

    db.close().into_diagnostic()?;
    Ok(())
}
