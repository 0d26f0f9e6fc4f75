//! Doctor directory CLI: crawl the directory, serve searches, query a dataset.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use doctor_directory::{
    read_dataset, AppConfig, FilterValue, MatchEngine, RecordField, RecordStore, Scorer,
};

/// Doctor directory crawler and search service
#[derive(Parser)]
#[command(name = "doctor-directory")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the directory into a CSV dataset
    Crawl(CrawlArgs),

    /// Serve list and existence searches over HTTP
    Serve(ServeArgs),

    /// Print the best fuzzy matches for a query
    Search(SearchArgs),
}

#[derive(Parser)]
struct CrawlArgs {
    /// Which filter values to walk
    #[arg(short, long, default_value = "dropdown")]
    scope: ScopeArg,

    /// Region names for `--scope regions` (comma-separated or repeated)
    #[arg(short, long, value_delimiter = ',')]
    region: Vec<String>,

    /// Specialties for `--scope specialties`, as GUID=Label
    #[arg(long, value_parser = parse_specialty)]
    specialty: Vec<FilterValue>,

    /// Output CSV file
    #[arg(short, long, default_value = "All_docs.csv")]
    output: PathBuf,

    /// Directory for failure screenshots
    #[arg(long)]
    screenshots: Option<PathBuf>,

    /// Directory start page
    #[arg(long)]
    start_url: Option<String>,

    /// Stop each filter after this many pages
    #[arg(long)]
    max_pages: Option<u32>,

    /// Show the browser window
    #[arg(long)]
    headful: bool,

    /// Chrome executable
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Proxy URL (e.g., http://127.0.0.1:8080 or socks5://127.0.0.1:1080)
    #[arg(short, long)]
    proxy: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    /// Every specialty in the dropdown
    Dropdown,
    /// The regions given with --region
    Regions,
    /// The specialties given with --specialty
    Specialties,
}

#[derive(Parser)]
struct ServeArgs {
    /// CSV dataset to load
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[derive(Parser)]
struct SearchArgs {
    /// Text to search for
    query: String,

    /// CSV dataset to search
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Field to match against
    #[arg(short, long, default_value = "name")]
    field: FieldArg,

    /// Scoring function
    #[arg(long, default_value = "w-ratio")]
    scorer: Scorer,

    /// Minimum score (0-100)
    #[arg(long, default_value = "75")]
    score: u8,

    /// Maximum number of results to display
    #[arg(short, long, default_value = "5")]
    limit: usize,

    /// Output format
    #[arg(long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum FieldArg {
    Name,
    Specialty,
    Region,
}

impl From<FieldArg> for RecordField {
    fn from(field: FieldArg) -> Self {
        match field {
            FieldArg::Name => RecordField::Name,
            FieldArg::Specialty => RecordField::Specialty,
            FieldArg::Region => RecordField::Region,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Crawl(args) => run_crawl(config, args).await,
        Commands::Serve(args) => run_serve(config, args).await,
        Commands::Search(args) => run_search(config, args),
    }
}

fn parse_specialty(value: &str) -> std::result::Result<FilterValue, String> {
    let (id, label) = value
        .split_once('=')
        .ok_or_else(|| format!("expected GUID=Label, got '{}'", value))?;
    let (id, label) = (id.trim(), label.trim());
    if id.is_empty() || label.is_empty() {
        return Err(format!("expected GUID=Label, got '{}'", value));
    }
    Ok(FilterValue::specialty(id, label))
}

#[cfg(feature = "headless")]
async fn run_crawl(mut config: AppConfig, args: CrawlArgs) -> Result<()> {
    use doctor_directory::browser::BrowserSession;
    use doctor_directory::{write_dataset, Crawler, FilterScope};

    let scope = match args.scope {
        ScopeArg::Dropdown => FilterScope::SpecialtyDropdown,
        ScopeArg::Regions => FilterScope::Regions(args.region),
        ScopeArg::Specialties => FilterScope::Specialties(args.specialty),
    };

    if let Some(url) = args.start_url {
        config.crawl.start_url = url;
    }
    if args.screenshots.is_some() {
        config.crawl.screenshot_dir = args.screenshots;
    }
    if args.max_pages.is_some() {
        config.crawl.pagination.max_pages = args.max_pages;
    }
    if args.headful {
        config.browser.headless = false;
    }
    if args.chrome.is_some() {
        config.browser.chrome_path = args.chrome;
    }
    if args.proxy.is_some() {
        config.browser.proxy_url = args.proxy;
    }

    let crawler = Crawler::new(config.crawl.clone()).context("Invalid crawl configuration")?;
    let session = BrowserSession::launch(&config.browser, config.crawl.selectors.clone())
        .await
        .context("Failed to start browser")?;

    let report = crawler.run_with(session, &scope).await?;

    println!("\n{:<40} {:>7} {:>6}  {}", "Filter", "Doctors", "Pages", "Ended");
    println!("{}", "-".repeat(80));
    for summary in &report.filters {
        println!(
            "{:<40} {:>7} {:>6}  {}",
            truncate(&summary.filter.display_name, 40),
            summary.records,
            summary.pages,
            summary.termination
        );
    }
    println!(
        "\n{} doctors from {} filters ({} failed) in {:.1}s",
        report.dataset.len(),
        report.filters.len(),
        report.failed_filters(),
        report.duration_ms as f64 / 1000.0
    );

    if report.dataset.is_empty() {
        info!("No doctors collected, {} not written", args.output.display());
        return Ok(());
    }
    write_dataset(&args.output, &report.dataset)?;
    println!("Saved to {}", args.output.display());
    Ok(())
}

#[cfg(not(feature = "headless"))]
async fn run_crawl(_config: AppConfig, _args: CrawlArgs) -> Result<()> {
    bail!("Crawling requires the `headless` feature")
}

async fn run_serve(mut config: AppConfig, args: ServeArgs) -> Result<()> {
    if let Some(dataset) = args.dataset {
        config.service.dataset = dataset;
    }
    if let Some(bind) = args.bind {
        config.service.bind = bind;
    }

    let store = Arc::new(RecordStore::load(&config.service.dataset));
    if !store.is_loaded() {
        info!("Serving without data; searches will return empty results");
    }
    let service = Arc::new(config.service.build_service(store));
    doctor_directory::server::serve(config.service.bind, service).await?;
    Ok(())
}

fn run_search(config: AppConfig, args: SearchArgs) -> Result<()> {
    let path = args.dataset.unwrap_or(config.service.dataset);
    let records = read_dataset(&path)
        .with_context(|| format!("Failed to read dataset {}", path.display()))?;
    if records.is_empty() {
        bail!("Dataset {} has no records", path.display());
    }

    let suggestions = MatchEngine::suggest(
        &records,
        args.field.into(),
        &args.query,
        args.scorer,
        args.score.min(100),
        args.limit,
    );

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&suggestions)?);
        }
        OutputFormat::Text => {
            if suggestions.is_empty() {
                println!("No matches for \"{}\" at score {}+", args.query, args.score);
                return Ok(());
            }
            for (i, suggestion) in suggestions.iter().enumerate() {
                let record = &suggestion.record;
                println!("{}. {} [{}]", i + 1, record.full_name, suggestion.score);
                println!("   {} | {}", record.specialty, record.practice_mode);
                if !record.address.is_empty() {
                    println!("   {}", record.address);
                }
                if !record.phone.is_empty() {
                    println!("   Tel: {}", record.phone);
                }
                if !record.region.is_empty() {
                    println!("   {}", record.region);
                }
                println!();
            }
        }
    }
    Ok(())
}

#[cfg(feature = "headless")]
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
