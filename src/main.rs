//! altdata CLI - Resumable alternative-data collection pipelines.

use altdata::checkpoint::{CheckpointStore, UnitSource, remaining};
use altdata::client::{BrightDataClient, RateLimiter, TavilyClient};
use altdata::enrich::{Matcher, PendingIndex, TargetMatcher};
use altdata::export::write_exports;
use altdata::models::{AltdataError, BatchSummary, Config, InputTable, PipelineKind};
use altdata::pipeline::{
    BatchOptions, BatchRunner, EnrichmentOptions, EnrichmentRun, FounderLookup, ListingColumns,
    ListingLookup, ProfileFinder, UnitProcessor, apply_records_file, discover_profiles,
};
use altdata::pool::LookupPool;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "altdata")]
#[command(version)]
#[command(about = "Resumable alternative-data collection pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "altdata.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the next batch of input rows
    Run {
        /// Number of rows to process in this run
        #[arg(short, long, default_value = "50")]
        batch: usize,

        /// Stop once this many rows have been processed overall
        #[arg(long)]
        max_total: Option<usize>,
    },

    /// Show checkpoint progress
    Status,

    /// Export results to CSV
    Export {
        /// Output directory (defaults to output.dir from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Find missing profile URLs for unresolved founders
    Discover,

    /// Resolve pending items through bulk enrichment
    Enrich {
        /// Apply records from a JSON file instead of submitting a job
        #[arg(long)]
        from_file: Option<PathBuf>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Archive the checkpoint and start over
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# altdata configuration file

# "founders" or "listings"
pipeline = "founders"

[input]
path = "data/companies.csv"
name_column = "name"
# Listings pipeline columns
# city_column = "City"
# state_column = "State"
# address_column = "Address"
# project_column = "Project Name (from Locations)"

[checkpoint]
path = "data/checkpoints/founders.json"

[tavily]
# API key (can also use TAVILY_API_KEY env var)
# api_key = "${TAVILY_API_KEY}"
timeout_secs = 30
max_retries = 3
max_results = 5
min_interval_ms = 500

[brightdata]
# API token (can also use BRIGHTDATA_API_KEY env var)
# api_key = "${BRIGHTDATA_API_KEY}"
dataset_id = "gd_l1viktl72bvl7bjuj0"
chunk_size = 500
poll_attempts = 60
poll_interval_secs = 30

[workers]
size = 20
chunk_size = 50

[enrichment]
key_fields = ["input.url", "url"]
value_fields = ["city", "location", "country_code"]
target_keywords = [
    "austin", "atx", "round rock", "cedar park", "pflugerville", "georgetown",
    "leander", "lakeway", "bee cave", "dripping springs", "hutto",
]

[output]
dir = "data/output"
prefix = "founders"
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn open_store(config: &Config) -> Result<CheckpointStore> {
    CheckpointStore::open(&config.checkpoint.path, config.pipeline.as_str())
        .with_context(|| format!("Failed to open checkpoint {:?}", config.checkpoint.path))
}

fn load_input(config: &Config) -> Result<InputTable> {
    InputTable::load(&config.input.path, &config.input.name_column)
        .with_context(|| format!("Failed to load input {:?}", config.input.path))
}

fn search_client(config: &Config) -> Result<(Arc<TavilyClient>, Arc<RateLimiter>)> {
    let api_key = config
        .resolve_tavily_key()
        .context("Failed to resolve Tavily API key")?;
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
        config.tavily.min_interval_ms,
    )));
    let client = TavilyClient::new(api_key, &config.tavily, Arc::clone(&limiter))?;
    Ok((Arc::new(client), limiter))
}

/// Cancelled on Ctrl-C; work stops at the next chunk boundary.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            trigger.cancel();
        }
    });
    token
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn run_batch<P: UnitProcessor>(
    processor: P,
    config: &Config,
    store: &mut CheckpointStore,
    input: &InputTable,
    options: &BatchOptions,
    shutdown: CancellationToken,
) -> Result<BatchSummary> {
    let runner = BatchRunner::new(
        Arc::new(processor),
        LookupPool::new(config.workers.size),
        shutdown,
    );
    Ok(runner.run(store, input, options).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config
                .resolve_tavily_key()
                .context("Failed to resolve Tavily API key")?;
            if let Err(e) = config.resolve_brightdata_key() {
                warn!("{e} (needed only for `enrich`)");
            }

            info!("Configuration is valid");
            info!("  Pipeline: {}", config.pipeline.as_str());
            info!("  Input: {:?} (name column '{}')", config.input.path, config.input.name_column);
            info!("  Checkpoint: {:?}", config.checkpoint.path);
            info!("  Workers: {}", config.workers.size);
            info!(
                "  Enrichment: {} keys/job, {} polls x {}s",
                config.brightdata.chunk_size,
                config.brightdata.poll_attempts,
                config.brightdata.poll_interval_secs
            );
            return Ok(());
        }

        Commands::Run { batch, max_total } => {
            let config = load_config(&cli.config)?;
            let input = load_input(&config)?;
            let mut store = open_store(&config)?;
            let (search, limiter) = search_client(&config)?;
            let shutdown = shutdown_on_ctrl_c();

            let options = BatchOptions {
                batch_size: batch,
                max_total,
                chunk_size: config.workers.size,
                show_progress: !cli.verbose,
            };
            let max_results = config.tavily.max_results;
            let summary = match config.pipeline {
                PipelineKind::Founders => {
                    let target = TargetMatcher::new(&config.enrichment.target_keywords);
                    let processor = FounderLookup::new(search, max_results, target)?;
                    run_batch(processor, &config, &mut store, &input, &options, shutdown).await?
                }
                PipelineKind::Listings => {
                    let processor =
                        ListingLookup::new(search, ListingColumns::from(&config.input), max_results);
                    run_batch(processor, &config, &mut store, &input, &options, shutdown).await?
                }
            };

            let state = store.state();
            let stats = limiter.stats();
            println!("\n=== Batch Complete ===");
            println!("Processed:   {}", summary.processed);
            println!("Failed:      {}", summary.failed);
            println!("Skipped:     {}", summary.skipped);
            println!("Items:       {}", summary.items);
            println!("Pending:     {}", summary.pending);
            println!("Throughput:  {:.0}/hr", summary.throughput_per_hour);
            println!("Runtime:     {:.1}s", summary.runtime_secs);
            println!("Requests:    {} ({} rate limited)", stats.total_requests, stats.total_429s);
            println!(
                "Progress:    {}/{} ({} remaining)",
                state.total_processed,
                input.len(),
                remaining(state, &input)
            );
        }

        Commands::Status => {
            let config = load_config(&cli.config)?;
            let store = open_store(&config)?;
            let summary = store.state().summary();

            println!("\n=== Checkpoint Status ===");
            println!("Pipeline:    {}", config.pipeline.as_str());
            println!("File:        {:?}", store.path());
            println!("Status:      {:?}", summary.status);
            println!("Processed:   {}", summary.total_processed);
            println!("Cursor:      {}", summary.last_processed_index);
            match load_input(&config) {
                Ok(input) => println!("Remaining:   {}", remaining(store.state(), &input)),
                Err(e) => warn!("Input unavailable: {e:#}"),
            }
            println!("Failed:      {}", summary.failed);
            println!("Items:       {}", summary.items);
            println!("  Unresolved: {}", summary.unresolved);
            println!("  Pending:    {} ({} unmatchable)", summary.pending, summary.unmatchable);
            println!("  Resolved:   {}", summary.resolved);
            println!("Targets:     {}", summary.targets);
            println!("Started:     {}", summary.started_at);
            println!("Updated:     {}", summary.last_updated);

            let backups = store.backups()?;
            println!("Backups:     {}", backups.len());
            for backup in backups {
                println!("  {}", backup.display());
            }
        }

        Commands::Export { output } => {
            let config = load_config(&cli.config)?;
            let input = load_input(&config)?;
            let store = open_store(&config)?;
            let dir = output.unwrap_or_else(|| config.output.dir.clone());

            let paths = write_exports(store.state(), &input, &dir, &config.output.prefix)
                .context("Failed to write exports")?;

            println!("\n=== Export Complete ===");
            println!("Rows:        {}", paths.rows);
            println!("Targets:     {}", paths.target_rows);
            println!("All:         {}", paths.all.display());
            println!("Targets:     {}", paths.targets.display());
            println!("By unit:     {}", paths.by_unit.display());
        }

        Commands::Discover => {
            let config = load_config(&cli.config)?;
            if config.pipeline != PipelineKind::Founders {
                bail!("`discover` applies to the founders pipeline only");
            }
            let mut store = open_store(&config)?;
            let (search, _) = search_client(&config)?;
            let target = TargetMatcher::new(&config.enrichment.target_keywords);
            let finder = Arc::new(ProfileFinder::new(search, config.tavily.max_results, target)?);

            let summary = discover_profiles(
                &mut store,
                finder,
                &LookupPool::new(config.workers.size),
                config.workers.chunk_size,
                &shutdown_on_ctrl_c(),
            )
            .await?;

            println!("\n=== Discovery Complete ===");
            println!("Candidates:  {}", summary.candidates);
            println!("Verified:    {}", summary.verified);
            println!("Located:     {}", summary.located);
            println!("Not found:   {}", summary.not_found);
            println!("Failed:      {}", summary.failed);
            println!("Skipped:     {}", summary.skipped);
        }

        Commands::Enrich { from_file, yes } => {
            let config = load_config(&cli.config)?;
            let mut store = open_store(&config)?;
            let matcher = Matcher::from_config(&config.enrichment);

            if let Some(path) = from_file {
                let report = apply_records_file(&mut store, &matcher, &path)
                    .with_context(|| format!("Failed to apply records from {path:?}"))?;
                println!("\n=== Records Applied ===");
                println!("Records:     {}", report.records);
                println!("Resolved:    {}", report.resolved);
                println!("Targets:     {}", report.targets);
                println!("Unmatched:   {}", report.unmatched);
                println!("Dropped:     {}", report.dropped_no_key + report.dropped_no_value);
                println!("Unmatchable: {}", report.unmatchable);
                return Ok(());
            }

            let index = PendingIndex::build(store.state());
            if index.is_empty() {
                println!("No pending items to enrich");
                return Ok(());
            }
            let keys = index.keys().len();
            let jobs = keys.div_ceil(config.brightdata.chunk_size.max(1));
            if !yes && !confirm(&format!("Submit {keys} keys in {jobs} enrichment job(s)?"))? {
                println!("Aborted");
                return Ok(());
            }

            let api_key = config
                .resolve_brightdata_key()
                .context("Failed to resolve Bright Data API key")?;
            let provider = BrightDataClient::new(
                api_key,
                &config.brightdata,
                Arc::new(RateLimiter::default()),
            )?;
            let run = EnrichmentRun::new(
                Arc::new(provider),
                matcher,
                EnrichmentOptions::from(&config.brightdata),
                shutdown_on_ctrl_c(),
            );
            let summary = run.run(&mut store).await?;

            println!("\n=== Enrichment Complete ===");
            println!("Keys:        {}", summary.keys);
            println!(
                "Chunks:      {} complete, {} incomplete, {} skipped",
                summary.completed_chunks, summary.incomplete_chunks, summary.skipped_chunks
            );
            println!("Resolved:    {}", summary.report.resolved);
            println!("Targets:     {}", summary.report.targets);
            println!("Unmatched:   {}", summary.report.unmatched);
            println!(
                "Dropped:     {}",
                summary.report.dropped_no_key + summary.report.dropped_no_value
            );
            println!("Unmatchable: {}", summary.report.unmatchable);
            println!("Pending:     {}", summary.still_pending);
        }

        Commands::Reset { yes } => {
            let config = load_config(&cli.config)?;
            let path = &config.checkpoint.path;
            let described = match CheckpointStore::read(path) {
                Ok(Some(state)) => format!("checkpoint with {} processed rows", state.total_processed),
                Ok(None) => "empty checkpoint".to_string(),
                Err(e @ AltdataError::CorruptCheckpoint { .. }) => {
                    warn!(error = %e, "Checkpoint is unreadable, it will be archived as-is");
                    "unreadable checkpoint".to_string()
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to read checkpoint {path:?}")),
            };
            if !yes && !confirm(&format!("Archive {described} and start over?"))? {
                println!("Aborted");
                return Ok(());
            }

            let (store, backup) = CheckpointStore::reset_path(path, config.pipeline.as_str())
                .with_context(|| format!("Failed to reset checkpoint {path:?}"))?;
            match backup {
                Some(backup) => println!("Archived to {}", backup.display()),
                None => println!("No checkpoint to archive"),
            }
            println!("Checkpoint reset: {:?}", store.path());
        }
    }

    Ok(())
}
