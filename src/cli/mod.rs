//! CLI module for Samle.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Samle - chunked media ingest with asynchronous analysis
///
/// Runs the upload/merge HTTP service and inspects the records it produces.
/// The name "Samle" comes from the Norwegian word for "gather."
#[derive(Parser, Debug)]
#[command(name = "samle")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the upload and merge HTTP server
    Serve {
        /// Host to bind to (defaults to server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show the status and result of a record
    Status {
        /// Record id returned by the merge endpoint
        record_id: String,
    },

    /// List recent records
    List {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Remove chunks of abandoned upload sessions
    Sweep {
        /// Minimum idle age in seconds (defaults to sweep.max_age_seconds)
        #[arg(long)]
        max_age: Option<u64>,
    },

    /// Check configuration and storage
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::parse_from(["samle", "-vv", "serve", "--port", "8080"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Serve { host, port } => {
                assert!(host.is_none());
                assert_eq!(port, Some(8080));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_list_default_limit() {
        let cli = Cli::parse_from(["samle", "list"]);
        assert!(matches!(cli.command, Commands::List { limit: 20 }));
    }
}
