use clap::Parser;
use miette::Result;
use tracing_subscriber::EnvFilter;

use dicom_index::cli::{Cli, Commands};

fn main() -> Result<()> {
    // Terminate silently on a closed pipe (`| head`) instead of panicking.
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;

    let filter = EnvFilter::try_from_env("DICOM_INDEX_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if global.verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Import(args) => dicom_index::cli::commands::import::run(args, &global),
        Commands::Ls(cmd) => dicom_index::cli::commands::ls::run(cmd, &global),
        Commands::Tag(args) => dicom_index::cli::commands::tag::run(args, &global),
        Commands::Remove(cmd) => dicom_index::cli::commands::remove::run(cmd, &global),
        Commands::Schema(cmd) => dicom_index::cli::commands::schema::run(cmd, &global),
        Commands::Cache(cmd) => dicom_index::cli::commands::cache::run(cmd, &global),
    }
}
