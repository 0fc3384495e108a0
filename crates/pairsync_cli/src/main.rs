//! pairsync CLI
//!
//! Command-line tools for syncing and inspecting sample stores kept as JSON
//! snapshot files.
//!
//! # Commands
//!
//! - `sync` - Run one sync between a client and a server snapshot
//! - `inspect` - Display the content of a snapshot
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// pairsync command-line tools.
#[derive(Parser)]
#[command(name = "pairsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync two snapshot files with each other
    Sync {
        /// Client store snapshot
        client: PathBuf,

        /// Server store snapshot
        server: PathBuf,

        /// File holding the options and cursors carried between runs
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Maximum passes before giving up on convergence
        #[arg(short, long, default_value = "10")]
        max_passes: u32,

        /// Stamp received records with the receiver's clock
        #[arg(long)]
        restamp: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display the content of a snapshot file
    Inspect {
        /// Snapshot file
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sync {
            client,
            server,
            state,
            max_passes,
            restamp,
            format,
        } => {
            let args = commands::sync::SyncArgs {
                client,
                server,
                state,
                max_passes,
                restamp,
            };
            commands::sync::run(&args, &format)?;
        }
        Commands::Inspect { path, format } => {
            commands::inspect::run(&path, &format)?;
        }
        Commands::Version => {
            println!("pairsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("pairsync core v{}", pairsync_core::VERSION);
        }
    }

    Ok(())
}
