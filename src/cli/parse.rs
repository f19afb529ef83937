//! CLI parse: clap types for ptops. No behavior; definitions only.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// ptops - load ptop support bundles into a time-series sink
#[derive(Parser)]
#[command(name = "ptops")]
#[command(about = "Ingest ptop support bundles as labeled time-series samples")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Append samples to this JSON lines file (samples are discarded when omitted)
    #[arg(long, global = true)]
    pub out: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Enable verbose logging (default: off)
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a bundle directory or .tar/.tar.gz/.tgz archive
    Load {
        /// Bundle path
        path: PathBuf,
        /// Re-ingest even if the same content was loaded before
        #[arg(long)]
        force: bool,
        /// Number of newest log files to ingest
        #[arg(long)]
        max_files: Option<usize>,
        /// Ticket id (deduced from a NIOSSPT-<digits> path component when omitted)
        #[arg(long)]
        sptid: Option<String>,
        /// Restrict ingestion to a metric category (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,
    },
    /// List loaded bundles, most recent first
    List,
    /// Show the active bundle
    Active,
    /// Make a bundle the active one
    Activate {
        bundle_id: String,
    },
    /// Unload a bundle (the active one when no id is given)
    Unload {
        bundle_id: Option<String>,
        /// Remove every bundle and clear the active pointer
        #[arg(long, conflicts_with = "bundle_id")]
        all: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_flags_parse() {
        let cli = Cli::try_parse_from([
            "ptops",
            "load",
            "/tmp/NIOSSPT-1.tgz",
            "--force",
            "--max-files",
            "3",
            "--category",
            "cpu",
            "--category",
            "mem",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Load {
                force,
                max_files,
                categories,
                ..
            } => {
                assert!(force);
                assert_eq!(max_files, Some(3));
                assert_eq!(categories, vec!["cpu", "mem"]);
            }
            _ => panic!("expected load"),
        }
    }

    #[test]
    fn unload_all_conflicts_with_id() {
        assert!(Cli::try_parse_from(["ptops", "unload", "b-1", "--all"]).is_err());
        assert!(Cli::try_parse_from(["ptops", "unload", "--all"]).is_ok());
    }
}
