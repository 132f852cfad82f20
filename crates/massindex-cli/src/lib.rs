//! Mass indexer CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, status, import)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, RunArgs};
pub use commands::{apply_run_args, import_records, parse_record, run_job, show_status};
