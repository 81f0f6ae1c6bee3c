#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use comeback_radar_lib::cache::ReleaseStore;
use comeback_radar_lib::crawling::{PageFetcher, Refresher, Updater, UpdaterDeadlines};
use comeback_radar_lib::domain::{
    InMemoryWhitelist, TimeBucket, WhitelistFingerprint, WhitelistProvider, format_release, whitelist_of,
};
use comeback_radar_lib::infrastructure::parsing::{DateTimeNormalizer, PageParser};
use comeback_radar_lib::infrastructure::{
    AppConfig, HttpClient, JsonLinesSink, init_logging_with_config, load_config,
};

const CLI_SCOPE: &str = "cli";

#[derive(Parser)]
#[command(name = "comeback-radar")]
#[command(author, version, about = "Comeback Radar - release schedule crawler", long_about = None)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the live schedule for the given months
    Refresh {
        /// Month buckets such as `may-2024` (defaults to the active window)
        buckets: Vec<String>,

        /// Artist to keep (can be specified multiple times)
        #[arg(short, long = "artist", value_name = "NAME", required = true)]
        artists: Vec<String>,

        /// Append the crawled records to a JSON Lines file
        #[arg(long, value_name = "FILE")]
        persist: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse a saved schedule page without touching the network
    Parse {
        /// HTML file to parse
        path: PathBuf,

        /// Month bucket the page belongs to
        #[arg(short, long)]
        bucket: String,

        /// Artist to keep (can be specified multiple times)
        #[arg(short, long = "artist", value_name = "NAME", required = true)]
        artists: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if cli.debug {
        config.logging.level = "debug".to_string();
    }
    init_logging_with_config(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Refresh {
            buckets,
            artists,
            persist,
            json,
        } => refresh(&config, &buckets, &artists, persist, json).await,
        Commands::Parse { path, bucket, artists } => parse(&config, &path, &bucket, &artists).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn local_offset(config: &AppConfig) -> Result<chrono::FixedOffset> {
    config
        .timezone
        .offset()
        .context("timezone.local_offset_minutes is out of range")
}

fn resolve_buckets(config: &AppConfig, labels: &[String]) -> Result<BTreeSet<TimeBucket>> {
    if labels.is_empty() {
        let today = chrono::Utc::now().with_timezone(&local_offset(config)?).date_naive();
        return Ok(TimeBucket::active_window(today).into_iter().collect());
    }
    Ok(labels.iter().map(TimeBucket::new).collect())
}

async fn refresh(
    config: &AppConfig,
    labels: &[String],
    artists: &[String],
    persist: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let buckets = resolve_buckets(config, labels)?;
    let whitelist = Arc::new(InMemoryWhitelist::with_scope(CLI_SCOPE, artists));

    let client = HttpClient::from_fetch_config(&config.fetch).context("Failed to build HTTP client")?;
    let fetcher = PageFetcher::new(config, Arc::new(client)).context("Failed to build page fetcher")?;
    let store = Arc::new(ReleaseStore::from_config(&config.cache));

    let mut updater = Updater::new(
        Arc::new(fetcher),
        Arc::clone(&store),
        whitelist.clone(),
        UpdaterDeadlines::from(&config.cache),
    );
    if let Some(path) = persist {
        info!("Persisting records to {}", path.display());
        updater = updater.with_sink(Arc::new(JsonLinesSink::new(path)));
    }

    let report = updater.refresh(buckets.clone()).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let members = whitelist.members_for(CLI_SCOPE).await;
    let fingerprint = WhitelistFingerprint::of(&whitelist.united_members().await);
    let ordered: Vec<TimeBucket> = buckets.into_iter().collect();
    let result = store.query(&ordered, &fingerprint, &members).await?;

    for bucket in report.failed() {
        if let Some(outcome) = report.outcome(bucket) {
            warn!("{}: {:?}", bucket, outcome);
        }
    }
    for record in &result.records {
        println!("{}", format_release(record));
    }
    if !result.missing.is_empty() {
        let missing: Vec<&str> = result.missing.iter().map(TimeBucket::label).collect();
        eprintln!("No data for: {}", missing.join(", "));
    }
    Ok(())
}

async fn parse(config: &AppConfig, path: &Path, bucket: &str, artists: &[String]) -> Result<()> {
    let html = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let offset = local_offset(config)?;
    let normalizer = match config.source.fallback_year {
        Some(year) => DateTimeNormalizer::new(year, offset),
        None => DateTimeNormalizer::current_year(offset),
    };
    let parser = PageParser::new(&config.source.selectors, normalizer)?;

    let bucket = TimeBucket::new(bucket);
    let records = parser.parse_page(&html, &bucket, &whitelist_of(artists));
    info!("Parsed {} records for {}", records.len(), bucket);
    for record in &records {
        println!("{}", format_release(record));
    }
    Ok(())
}
