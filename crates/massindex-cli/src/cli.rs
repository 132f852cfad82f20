//! CLI argument parsing for the mass indexer.
//!
//! Flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Mass indexer
///
/// Rebuilds the full-text index from the record store.
#[derive(Parser, Debug)]
#[command(name = "massindex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/massindex/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run or resume a mass-indexing job
    Run(RunArgs),

    /// Show stored jobs and partition progress
    Status {
        /// Only show this job
        #[arg(long)]
        job_name: Option<String>,

        /// Override database path
        #[arg(long)]
        db_path: Option<String>,

        /// Override index path
        #[arg(long)]
        index_path: Option<String>,
    },

    /// Load records from a JSON Lines file into the record store
    Import {
        /// Entity type of every record in the file
        #[arg(long)]
        entity_type: String,

        /// File with one JSON object per line, keyed by `id`
        file: String,

        /// Override database path
        #[arg(long)]
        db_path: Option<String>,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Comma-separated entity types (overrides job.entity_types)
    #[arg(long)]
    pub entity_types: Option<String>,

    /// Job name used to find a restartable execution
    #[arg(long)]
    pub job_name: Option<String>,

    /// Override database path
    #[arg(long)]
    pub db_path: Option<String>,

    /// Override index path
    #[arg(long)]
    pub index_path: Option<String>,

    /// Opaque query applied to every type
    #[arg(long, conflicts_with = "criteria")]
    pub query: Option<String>,

    /// JSON predicate applied to every type
    #[arg(long)]
    pub criteria: Option<String>,

    /// Keys per partition
    #[arg(long)]
    pub rows_per_partition: Option<usize>,

    /// Upper bound on worker threads
    #[arg(long)]
    pub max_threads: Option<usize>,

    /// Skip purging the index before indexing
    #[arg(long)]
    pub no_purge: bool,

    /// Discard stored state of this job name before starting
    #[arg(long)]
    pub restart_fresh: bool,
}
