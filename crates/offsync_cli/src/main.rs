//! offsync CLI
//!
//! Command-line tools for inspecting and repairing an offsync store
//! directory while the owning application is stopped.
//!
//! # Commands
//!
//! - `inspect` - Show cache, queue and dead-letter statistics
//! - `list-pending` - List queued writes in drain order
//! - `remove` - Drop one queued write
//! - `clear-cache` - Delete the reference-data snapshot
//! - `dead-letters` - List dead-lettered writes
//! - `requeue` - Move a dead letter back to the queue tail

mod commands;
mod error;
mod render;

use clap::{Parser, Subcommand};
use error::{CliError, CliResult};
use render::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// offsync store maintenance tools.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cache, queue and dead-letter statistics
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List queued writes in drain order
    ListPending {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Drop one queued write without delivering it
    Remove {
        /// Record key
        key: String,
    },

    /// Delete the cached reference-data snapshot
    ClearCache,

    /// List dead-lettered writes
    DeadLetters {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Move a dead-lettered write back to the queue tail
    Requeue {
        /// Record key
        key: String,
    },

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let path = cli.path;
    let require = |command: &'static str| path.clone().ok_or(CliError::MissingPath(command));

    match cli.command {
        Commands::Inspect { format } => {
            commands::inspect::run(&require("inspect")?, format)?;
        }
        Commands::ListPending { format } => {
            commands::pending::list(&require("list-pending")?, format)?;
        }
        Commands::Remove { key } => {
            commands::pending::remove(&require("remove")?, &key)?;
        }
        Commands::ClearCache => {
            commands::cache::clear(&require("clear-cache")?)?;
        }
        Commands::DeadLetters { format } => {
            commands::dead_letters::list(&require("dead-letters")?, format)?;
        }
        Commands::Requeue { key } => {
            commands::dead_letters::requeue(&require("requeue")?, &key)?;
        }
        Commands::Version => {
            println!("offsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["offsync", "list-pending", "--format", "json", "-p", "/tmp/x"]);
        assert_eq!(cli.path, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(
            cli.command,
            Commands::ListPending {
                format: OutputFormat::Json
            }
        ));
    }

    #[test]
    fn format_defaults_to_text() {
        let cli = Cli::parse_from(["offsync", "inspect"]);
        assert!(matches!(
            cli.command,
            Commands::Inspect {
                format: OutputFormat::Text
            }
        ));
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(Cli::try_parse_from(["offsync", "dead-letters", "--format", "xml"]).is_err());
    }

    #[test]
    fn commands_need_a_path() {
        let cli = Cli::parse_from(["offsync", "clear-cache"]);
        let err = run(cli).unwrap_err();
        assert!(matches!(err, CliError::MissingPath("clear-cache")));
    }

    #[test]
    fn version_needs_no_path() {
        let cli = Cli::parse_from(["offsync", "version"]);
        assert!(run(cli).is_ok());
    }
}
