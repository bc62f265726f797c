//! CLI argument definitions using clap derive

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::commands::{
    cache::CacheCommands, import::ImportArgs, ls::LsCommands, remove::RemoveCommands,
    schema::SchemaCommands, tag::TagArgs,
};

/// Index location used when neither `--db` nor `DICOM_INDEX_DB` is given
pub const DEFAULT_DATABASE: &str = "dicom-db/index.sqlite";

#[derive(Parser)]
#[command(name = "dicom-index")]
#[command(author, version, about = "Local DICOM metadata index and file store")]
#[command(long_about = "Indexes DICOM files into a patient / study / series / image hierarchy, keeps managed copies, and caches attribute values for fast lookups.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Index file (":memory:" for a throwaway index)
    #[arg(long, global = true, env = "DICOM_INDEX_DB", default_value = DEFAULT_DATABASE)]
    pub db: PathBuf,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "auto")]
    pub format: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Enable verbose output (debug logging)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Index files and directories
    Import(ImportArgs),

    /// List patients, studies, series or instances
    #[command(subcommand)]
    Ls(LsCommands),

    /// Show attribute values of an indexed instance
    Tag(TagArgs),

    /// Remove indexed entries (and managed copies)
    #[command(subcommand)]
    Remove(RemoveCommands),

    /// Inspect or rebuild the index schema
    #[command(subcommand)]
    Schema(SchemaCommands),

    /// Manage the attribute cache
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Table for terminals
    #[default]
    Auto,
    Tsv,
    Json,
    Md,
    /// Identifiers only, one per line
    Id,
}
