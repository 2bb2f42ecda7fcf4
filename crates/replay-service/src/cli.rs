//! Command line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "replay-service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Replays stored records by re-publishing change notifications")]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "REPLAY_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Consume work items until interrupted
    Run,

    /// Submit a replay and process it to completion in-process
    Replay {
        /// `replay` or `reindex`
        #[arg(short, long, default_value = "replay")]
        operation: String,

        /// Kind to replay; repeat for several. Omit to replay every kind.
        #[arg(short, long = "kind")]
        kinds: Vec<String>,

        /// Use this replay id instead of a generated one
        #[arg(long)]
        replay_id: Option<String>,

        /// Value of the `data-partition-id` header
        #[arg(short, long)]
        partition_id: Option<String>,
    },

    /// Print the status of a replay from the progress store
    Status {
        replay_id: String,

        /// Restrict the report to these kinds
        #[arg(short, long = "kind")]
        kinds: Vec<String>,
    },
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
