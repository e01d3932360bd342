use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use pricehound_client::{DEFAULT_TIMEOUT, default_adapters};
use pricehound_core::traits::SessionBackend;
use pricehound_core::{
    AggregateResult, BatchItem, BatchReport, BatchSearch, EngineConfig, ItemOutcome,
    PriceSearchService, SearchRequest, SourceCatalog, TracingBatchReporter,
};

#[derive(Parser)]
#[command(name = "pricehound", version, about = "Multi-source price discovery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search every source for one product and rank the offers
    Search {
        /// Free-text product description
        #[arg(default_value = "")]
        query: String,

        /// EAN/UPC/GTIN code; searched instead of the text when given
        #[arg(short, long)]
        barcode: Option<String>,

        /// Comma-separated source ids (defaults to every known source)
        #[arg(short, long, value_delimiter = ',')]
        sources: Vec<String>,

        /// Offers kept per source
        #[arg(short, long, default_value_t = 10)]
        max_results: usize,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Price every line of a CSV file with `description` and `barcode` columns
    Batch {
        /// CSV file of line items
        #[arg(short, long)]
        input: PathBuf,

        /// Comma-separated source ids (defaults to every known source)
        #[arg(short, long, value_delimiter = ',')]
        sources: Vec<String>,

        /// Offers kept per source
        #[arg(short, long, default_value_t = 5)]
        max_results: usize,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// List the sources PriceHound can query
    Sources,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Table,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pricehound=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            query,
            barcode,
            sources,
            max_results,
            format,
        } => {
            let service = build_service().await?;
            let request = SearchRequest {
                query,
                barcode,
                sources: sources_or_all(sources, service.catalog()),
                max_results_per_source: max_results,
            };
            let result = service.search_prices(request).await?;
            print_search(&result, format)?;
        }
        Commands::Batch {
            input,
            sources,
            max_results,
            format,
        } => {
            let items = read_items(&input)?;
            let service = Arc::new(build_service().await?);
            let sources = sources_or_all(sources, service.catalog());
            let report = cmd_batch(service, items, sources, max_results).await;
            print_batch(&report, format)?;
        }
        Commands::Sources => cmd_sources(&SourceCatalog::default()),
    }

    Ok(())
}

async fn build_service() -> Result<PriceSearchService> {
    let config = EngineConfig::from_env()?;
    let adapters = default_adapters(config.source_timeout.unwrap_or(DEFAULT_TIMEOUT));
    Ok(PriceSearchService::from_config(
        &config,
        session_backend().await?,
        adapters,
    ))
}

#[cfg(feature = "browser")]
async fn session_backend() -> Result<Arc<dyn SessionBackend>> {
    let backend = pricehound_client::BrowserBackend::launch().await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "browser"))]
async fn session_backend() -> Result<Arc<dyn SessionBackend>> {
    Ok(Arc::new(pricehound_client::HttpBackend::new()))
}

fn sources_or_all(sources: Vec<String>, catalog: &SourceCatalog) -> Vec<String> {
    if sources.is_empty() {
        catalog.ids().into_iter().map(String::from).collect()
    } else {
        sources
    }
}

fn read_items(path: &Path) -> Result<Vec<BatchItem>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let items = reader
        .deserialize()
        .collect::<Result<Vec<BatchItem>, _>>()
        .with_context(|| format!("Invalid line item in {}", path.display()))?;
    tracing::info!(items = items.len(), "Loaded line items from {}", path.display());
    Ok(items)
}

async fn cmd_batch(
    service: Arc<PriceSearchService>,
    items: Vec<BatchItem>,
    sources: Vec<String>,
    max_results: usize,
) -> BatchReport {
    let handle = BatchSearch::new(service).start(items, sources, max_results);

    // Ctrl+C cancels the items still running; finished ones are kept.
    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling remaining items");
            token.cancel();
        }
    });

    handle.wait(&TracingBatchReporter).await
}

fn cmd_sources(catalog: &SourceCatalog) {
    println!("{:<12} {:<12} {:<8} DESCRIPTION", "ID", "NAME", "TIER");
    for source in catalog.iter() {
        println!(
            "{:<12} {:<12} {:<8} {}",
            source.id, source.display_name, source.reliability, source.description
        );
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_search(result: &AggregateResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Csv => write_search_csv(result)?,
        OutputFormat::Table => print_search_table(result),
    }
    Ok(())
}

fn write_search_csv(result: &AggregateResult) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record([
        "source",
        "title",
        "price",
        "currency",
        "availability",
        "shipping_cost",
        "seller",
        "url",
        "error",
    ])?;

    for source in &result.results {
        if let Some(error) = &source.error {
            let mut row = vec![""; 9];
            row[0] = source.source.as_str();
            row[8] = error.as_str();
            writer.write_record(&row)?;
            continue;
        }
        for record in &source.records {
            writer.write_record([
                record.source.as_str(),
                record.title.as_deref().unwrap_or(""),
                record.price.to_string().as_str(),
                record.currency.as_str(),
                record.availability.as_str(),
                record
                    .shipping_cost
                    .map(|p| p.to_string())
                    .unwrap_or_default()
                    .as_str(),
                record.seller_name.as_deref().unwrap_or(""),
                record.source_url.as_deref().unwrap_or(""),
                "",
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn print_search_table(result: &AggregateResult) {
    println!(
        "Results for \"{}\" ({} of {} sources answered, {} ms):\n",
        result.query.search_term(),
        result.successful_sources(),
        result.results.len(),
        result.search_time_ms
    );

    for source in &result.results {
        match (&source.error_kind, &source.error) {
            (Some(kind), Some(error)) => {
                println!("  {:<12} [{kind}] {error}", source.source);
            }
            _ if source.records.is_empty() => {
                println!("  {:<12} no offers", source.source);
            }
            _ => {
                for record in &source.records {
                    println!(
                        "  {:<12} {:>10} {}  {:<12} {}",
                        source.source,
                        record.price,
                        record.currency,
                        record.availability,
                        record.title.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
    }

    match &result.best {
        Some(best) => println!(
            "\nBest: {} {} on {}{}",
            best.price,
            best.currency,
            best.source,
            best.source_url
                .as_deref()
                .map(|u| format!(" ({u})"))
                .unwrap_or_default()
        ),
        None => println!("\nNo offers found"),
    }
}

fn print_batch(report: &BatchReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            writer.write_record([
                "index",
                "description",
                "barcode",
                "status",
                "best_source",
                "best_price",
                "error",
            ])?;
            for item in &report.items {
                let (status, best, error) = outcome_columns(&item.outcome);
                let (best_source, best_price) = best.unwrap_or_default();
                writer.write_record([
                    item.index.to_string().as_str(),
                    item.item.description.as_str(),
                    item.item.barcode.as_deref().unwrap_or(""),
                    status,
                    best_source.as_str(),
                    best_price.as_str(),
                    error,
                ])?;
            }
            writer.flush()?;
        }
        OutputFormat::Table => {
            for item in &report.items {
                let (status, best, error) = outcome_columns(&item.outcome);
                let label = item
                    .item
                    .barcode
                    .as_deref()
                    .filter(|_| item.item.description.trim().is_empty())
                    .unwrap_or(&item.item.description);
                match best {
                    Some((source, price)) => {
                        println!("  #{:<3} {:<40} {price} EUR on {source}", item.index, label)
                    }
                    None => println!("  #{:<3} {:<40} {status} {error}", item.index, label),
                }
            }
            println!(
                "\n{} completed, {} failed, {} cancelled in {} ms",
                report.completed(),
                report.failed(),
                report.cancelled(),
                report.elapsed_ms
            );
        }
    }
    Ok(())
}

/// Status label, best (source, price) and error text for one item.
fn outcome_columns(outcome: &ItemOutcome) -> (&'static str, Option<(String, String)>, &str) {
    match outcome {
        ItemOutcome::Completed { result } => (
            "completed",
            result
                .best
                .as_ref()
                .map(|b| (b.source.clone(), b.price.to_string())),
            "",
        ),
        ItemOutcome::Failed { error } => ("failed", None, error.as_str()),
        ItemOutcome::Cancelled => ("cancelled", None, ""),
    }
}
