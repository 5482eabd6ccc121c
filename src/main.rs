use anyhow::Context;
use clap::Parser;

use esus_pipeline::{
    args::{Args, Command},
    export, pipeline,
};

fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.cmd {
        Command::Load(cmd) => {
            let summary = pipeline::run_load(cmd).context("load failed")?;
            tracing::info!(
                "Load complete: {} of {} records stored as notifications",
                summary.notifications,
                summary.records_read
            );
        }
        Command::Export(cmd) => {
            let audit = export::run_export(cmd).context("export failed")?;
            tracing::info!("Export complete: {} rows", audit.rows);
        }
    }
    Ok(())
}
