//! CLI entry point for the geoharvest tool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use geoharvest_core::acquire::{PdfDownloadManager, PdfLayout};
use geoharvest_core::citations::CitationDiscovery;
use geoharvest_core::config::Config;
use geoharvest_core::db::Database;
use geoharvest_core::discover::UrlDiscovery;
use geoharvest_core::extract::{ParsedContentCache, PdfExtractor};
use geoharvest_core::fetch::Fetcher;
use geoharvest_core::hotcache::DatasetHotCache;
use geoharvest_core::pipeline::{CancelToken, Coordinator, RunOptions};
use geoharvest_core::search::GeoDatasetSearch;
use geoharvest_core::source::SourceRegistry;
use geoharvest_core::store::{PublicationSubstatus, Store};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // Configuration errors are fatal at startup.
    let mut config =
        Config::load(args.config.as_deref()).context("failed to load configuration")?;

    match args.command {
        Command::Sources => {
            print_sources(&config);
            Ok(())
        }
        Command::Run {
            query,
            max_datasets,
            no_enrichment,
            mirrors,
            database_url,
            pdf_root,
        } => {
            if let Some(database_url) = database_url {
                config.database_url = database_url;
            }
            if let Some(pdf_root) = pdf_root {
                config.pdf_root = pdf_root;
            }
            if mirrors {
                config.features.enable_last_resort_mirrors = true;
            }
            run_pipeline(&config, &query, usize::from(max_datasets), no_enrichment, mirrors)
                .await
        }
    }
}

/// Assembles the engine and runs one query end to end.
async fn run_pipeline(
    config: &Config,
    query: &str,
    max_datasets: usize,
    no_enrichment: bool,
    mirrors: bool,
) -> Result<()> {
    info!(query = %query, max_datasets, "geoharvest starting");

    let fetcher =
        Fetcher::new(&config.fetcher, &config.contact_email).context("failed to build fetcher")?;

    let db = Database::from_url(&config.database_url)
        .await
        .context("failed to open database")?;
    let store = Store::new(db);
    let hot_cache = Arc::new(DatasetHotCache::new(
        store.clone(),
        config.cache.max_size,
        Duration::from_secs(config.cache.ttl_seconds),
    ));

    let registry = Arc::new(SourceRegistry::from_config(config, &fetcher));
    info!(sources = registry.len(), "source registry built");

    let coordinator = Coordinator::new(
        Arc::new(GeoDatasetSearch::new(
            fetcher.clone(),
            config.source("pmc").and_then(|s| s.api_key.clone()),
        )),
        CitationDiscovery::new(fetcher.clone(), &config.contact_email),
        UrlDiscovery::new(
            registry,
            Duration::from_secs_f64(config.coordinator.per_source_timeout_s),
        ),
        PdfDownloadManager::new(
            fetcher,
            PdfLayout::new(&config.pdf_root),
            config.coordinator.max_concurrent_downloads,
        ),
        PdfExtractor::new(),
        Arc::new(ParsedContentCache::new(
            &config.parsed_cache_root,
            config.parsed_cache_max_size,
        )),
        store,
        Arc::clone(&hot_cache),
        config.coordinator.clone(),
    );

    let mut options = RunOptions::from_config(&config.coordinator);
    options.enable_enrichment = !no_enrichment;
    options.enable_last_resort_mirrors = mirrors && config.features.enable_last_resort_mirrors;

    // Ctrl-C cancels cooperatively; persisted rows stay persisted.
    let cancel = CancelToken::new();
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling run");
            ctrlc_cancel.cancel();
        }
    });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("processing '{query}'"));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = coordinator
        .run_with_cancel(query, max_datasets, options, cancel)
        .await?;
    spinner.finish_and_clear();

    // Per-dataset summary.
    for dataset in &result.datasets {
        let parsed = dataset
            .publications
            .iter()
            .filter(|p| p.substatus == PublicationSubstatus::Parsed)
            .count();
        let with_pdf = dataset
            .publications
            .iter()
            .filter(|p| p.substatus != PublicationSubstatus::MetadataOnly)
            .count();
        println!(
            "{:<12} {:<9} publications={:<3} pdfs={:<3} parsed={:<3} ({:.1}s)",
            dataset.dataset_id,
            format!("{:?}", dataset.status).to_lowercase(),
            dataset.publications.len(),
            with_pdf,
            parsed,
            dataset.duration.as_secs_f64(),
        );
    }

    let stats = coordinator.hot_cache().stats();
    info!(
        datasets = result.datasets.len(),
        cancelled = result.cancelled,
        duration_s = result.duration.as_secs_f64(),
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        "run complete"
    );
    Ok(())
}

/// Prints the configured source table.
fn print_sources(config: &Config) {
    println!(
        "{:<15} {:<5} {:<8} {:<12} {}",
        "source", "tier", "enabled", "rate", "notes"
    );
    for (name, source) in &config.sources {
        let mut notes = Vec::new();
        if source.api_key.is_some() {
            notes.push("api key");
        }
        if name == "institutional" && source.url_template.is_some() {
            notes.push("proxy template");
        }
        if name.starts_with("mirror_") && !config.features.enable_last_resort_mirrors {
            notes.push("feature-gated off");
        }
        println!(
            "{:<15} {:<5} {:<8} {:<12} {}",
            name,
            source.tier,
            source.enabled,
            format!("{}/{}s", source.rate_per_window, source.window_seconds),
            notes.join(", "),
        );
    }
}
