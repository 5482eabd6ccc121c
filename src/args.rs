use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::constants::{DEFAULT_EXPORT_PATH, DEFAULT_INPUT_PATH};

/// Normalize e-SUS COVID-19 notifications into SQLite and export the analytic dataset.
#[derive(Debug, Parser)]
#[command(name = "esus_pipeline")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read the raw line-list, reconcile IBGE codes and insert every entity into the store.
    Load(LoadArgs),
    /// Flatten the store back into one record per notification and write the dataset.
    Export(ExportArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct LoadArgs {
    /// Raw notification CSV.
    #[arg(long, default_value = DEFAULT_INPUT_PATH)]
    pub input_path: PathBuf,

    /// Field delimiter of the raw CSV.
    #[arg(long, default_value_t = ',')]
    pub delimiter: char,

    /// SQLite database path. Overrides DB_PATH / DB_DIR + DB_NAME from the environment.
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Delete the database file before loading.
    ///
    /// The load is append-only, so re-running against a populated store duplicates rows
    /// (or trips a uniqueness constraint). Use this to start from a clean store.
    #[arg(long, default_value_t = false)]
    pub reset_db: bool,

    /// Skip the CREATE TABLE IF NOT EXISTS pass (store schema is provisioned externally).
    #[arg(long, default_value_t = false)]
    pub no_init_schema: bool,

    /// Optional path for a JSON summary of per-stage counts.
    #[arg(long)]
    pub report_json: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExportArgs {
    /// SQLite database path. Overrides DB_PATH / DB_DIR + DB_NAME from the environment.
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Output path (.csv or .parquet).
    #[arg(long, default_value = DEFAULT_EXPORT_PATH)]
    pub output_path: PathBuf,

    /// Write an empty dataset instead of failing when no notification qualifies.
    #[arg(long, default_value_t = false)]
    pub allow_empty: bool,
}
