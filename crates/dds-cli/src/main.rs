use anyhow::Result;
use clap::{Parser, Subcommand};
use dds_sync::{catalog, IngestConfig, IngestPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dds-cli")]
#[command(about = "Demographic data ingestion engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest one dataset by catalog name.
    Run { dataset: String },
    /// Ingest every dataset in catalog order.
    RunAll,
    /// List the dataset catalog.
    ListDatasets,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::RunAll) {
        Commands::Run { dataset } => {
            let mut pipeline = IngestPipeline::connect(IngestConfig::from_env()).await?;
            let record = pipeline.run(&dataset).await;
            pipeline.close().await?;
            match record.error {
                None => {
                    println!(
                        "{}: {} rows written to {}",
                        record.dataset, record.rows_written, record.table
                    );
                }
                Some(error) => {
                    anyhow::bail!("{}: {error}", record.dataset);
                }
            }
        }
        Commands::RunAll => {
            let mut pipeline = IngestPipeline::connect(IngestConfig::from_env()).await?;
            let summary = pipeline.run_all().await;
            pipeline.close().await?;
            println!(
                "run {}: {} rows written across {} datasets",
                summary.run_id,
                summary.rows_written(),
                summary.datasets.len()
            );
            let failed = summary.failed();
            if !failed.is_empty() {
                for record in &failed {
                    eprintln!(
                        "{} failed: {}",
                        record.dataset,
                        record.error.as_deref().unwrap_or("unknown error")
                    );
                }
                anyhow::bail!("{} of {} datasets failed", failed.len(), summary.datasets.len());
            }
        }
        Commands::ListDatasets => {
            for descriptor in catalog() {
                println!("{:<24} -> {}", descriptor.name, descriptor.table);
            }
        }
    }

    Ok(())
}
