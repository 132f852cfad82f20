//! Mass indexer
//!
//! Rebuilds the full-text index for a set of entity types from the record
//! store, restartable by job name.
//!
//! # Usage
//!
//! ```bash
//! massindex run [--entity-types Book,Author] [--job-name NAME] [--restart-fresh]
//! massindex status [--job-name NAME]
//! massindex import --entity-type Book books.jsonl
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/massindex/config.toml)
//! 3. Environment variables (MASSINDEX__*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use massindex_cli::{import_records, run_job, show_status, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            run_job(cli.config.as_deref(), cli.log_level.as_deref(), args).await?;
        }
        Commands::Status {
            job_name,
            db_path,
            index_path,
        } => {
            show_status(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                job_name.as_deref(),
                db_path.as_deref(),
                index_path.as_deref(),
            )?;
        }
        Commands::Import {
            entity_type,
            file,
            db_path,
        } => {
            import_records(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                &entity_type,
                &file,
                db_path.as_deref(),
            )?;
        }
    }

    Ok(())
}
