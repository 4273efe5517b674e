use chrono::Utc;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use holdings_tracker::config::Config;
use holdings_tracker::dataset::write_dataset;
use holdings_tracker::edgar::{EdgarClient, FilingFetcher};
use holdings_tracker::investor::Catalog;
use holdings_tracker::pipeline::Pipeline;
use holdings_tracker::stocks::{EnrichmentService, SubprocessEnricher};
use holdings_tracker::{PipelineError, Result};

/// Build the 13F top-holdings datasets for one investor category and quarter.
#[derive(Parser)]
#[command(name = "holdings_tracker", version, about, long_about = None)]
struct Cli {
    /// Quarter to build, e.g. Q3-2024
    #[arg(long)]
    quarter: String,

    /// Investor category, e.g. legendary
    #[arg(long)]
    category: String,

    /// Directory the JSON datasets are written to (default: $OUTPUT_DIR or public/data)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// JSON catalog replacing the built-in fund roster, ticker table and quarter calendar
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Do not run the price/valuation enrichment step
    #[arg(long)]
    skip_enrichment: bool,
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    let catalog = match &cli.catalog {
        Some(path) => Catalog::from_json_file(path)?,
        None => Catalog::builtin(),
    };

    // Reject bad selections before any network activity.
    catalog.category(&cli.category)?;
    catalog.quarter(&cli.quarter)?;

    let enricher: Option<Box<dyn EnrichmentService>> = if cli.skip_enrichment {
        None
    } else {
        Some(Box::new(SubprocessEnricher::from_command_line(&config.enrich_command)?))
    };

    let fetcher = FilingFetcher::new(EdgarClient::new(&config.sec)?, &config.sec);
    let pipeline = Pipeline::new(catalog, fetcher, enricher);

    let dataset = pipeline.build(&cli.category, &cli.quarter, Utc::now()).await?;
    write_dataset(&config.output_dir, &dataset)?;

    tracing::info!(
        funds = dataset.summary.metadata.aggregate.funds_analyzed,
        requested = dataset.summary.metadata.aggregate.funds_requested,
        top_holdings = dataset.detailed.fund_top_holdings.len(),
        "build complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("holdings_tracker=info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if matches!(
                e,
                PipelineError::UnknownCategory { .. } | PipelineError::UnknownQuarter { .. }
            ) {
                eprintln!("{}", Cli::command().render_usage());
            }
            ExitCode::FAILURE
        }
    }
}
