//! kohl - KOReader highlight importer for Calibre

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use kohl::sync::{self, SyncOptions};

#[derive(Parser)]
#[command(name = "kohl")]
#[command(version, about = "Import KOReader highlights into a Calibre library", long_about = None)]
#[command(after_help = "EXAMPLES:
    kohl /media/kobo/.metadata.calibre ~/'Calibre Library'
    kohl --dry-run /media/kobo/.metadata.calibre ~/'Calibre Library'")]
struct Cli {
    /// KOReader device manifest (the .metadata.calibre file)
    #[arg(value_name = "METADATA_CALIBRE")]
    manifest: PathBuf,

    /// Calibre library directory (contains metadata.db)
    #[arg(value_name = "LIBRARY")]
    library: PathBuf,

    /// Report the merge without writing to the database
    #[arg(long)]
    dry_run: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let options = SyncOptions {
        dry_run: cli.dry_run,
    };
    match sync::run(&cli.manifest, &cli.library, options) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
