//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Costwatch CLI - cost and usage alert replay.
#[derive(Parser, Debug, Clone)]
#[command(name = "costwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the alert and notification snapshots.
    #[arg(short, long, env = "COSTWATCH_STATE", default_value = ".costwatch")]
    pub state: PathBuf,

    /// Engine configuration file (JSON).
    #[arg(short, long, env = "COSTWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Import alert definitions from a JSON array.
    Import {
        /// File containing the alerts.
        alerts: PathBuf,
    },

    /// Refresh every alert against canned query results.
    Refresh {
        /// JSON object mapping alert ids to query results.
        results: PathBuf,

        /// Worker options.
        #[command(flatten)]
        workers: WorkerArgs,
    },

    /// Send digests for customers with pending notifications.
    Digest {
        /// Only send this customer's digest.
        #[arg(long)]
        customer: Option<String>,

        /// Worker options.
        #[command(flatten)]
        workers: WorkerArgs,
    },

    /// Print pending notifications grouped by customer and alert.
    Pending {
        /// Only show this customer.
        #[arg(long)]
        customer: Option<String>,
    },
}

/// Task worker pool options.
#[derive(Parser, Debug, Clone, Copy)]
pub struct WorkerArgs {
    /// Maximum tasks running at once.
    #[arg(short, long, default_value_t = 4)]
    pub workers: usize,

    /// Attempts per task before it is dropped.
    #[arg(long, default_value_t = 2)]
    pub max_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_refresh() {
        let cli = Cli::try_parse_from([
            "costwatch",
            "--state",
            "/tmp/cw",
            "refresh",
            "results.json",
            "--workers",
            "8",
        ])
        .unwrap();
        assert_eq!(cli.state, PathBuf::from("/tmp/cw"));
        match cli.command {
            Commands::Refresh { results, workers } => {
                assert_eq!(results, PathBuf::from("results.json"));
                assert_eq!(workers.workers, 8);
                assert_eq!(workers.max_attempts, 2);
            }
            other => unreachable!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_digest_for_one_customer() {
        let cli = Cli::try_parse_from(["costwatch", "--log-json", "digest", "--customer", "c1"])
            .unwrap();
        assert!(cli.log_json);
        assert!(matches!(
            cli.command,
            Commands::Digest { customer: Some(ref c), .. } if c == "c1"
        ));
    }

    #[test]
    fn import_requires_path() {
        assert!(Cli::try_parse_from(["costwatch", "import"]).is_err());
    }
}
