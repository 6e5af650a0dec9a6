mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reem")]
#[command(about = "A middleware-driven static site builder", long_about = None)]
struct Cli {
    /// Project root containing reem.toml, the source and layout directories.
    #[arg(long, short, default_value = ".")]
    root: PathBuf,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the source directory and write the whole site.
    Build,
    /// Rebuild after a single file changed, reusing the last snapshot.
    Rebuild { file: PathBuf },
    /// Build, then rebuild incrementally whenever the project changes.
    Watch,
}

fn main() {
    let cli = Cli::parse();

    // --verbose enables DEBUG, otherwise RUST_LOG or INFO
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Build => commands::build_site(&cli.root),
        Commands::Rebuild { file } => commands::rebuild_file(&cli.root, &file),
        Commands::Watch => commands::watch_site(&cli.root),
    };

    if let Err(error) = result {
        tracing::error!("{error}");
        std::process::exit(1);
    }
}
