mod cascade;
mod clock;
mod config;
mod database;
mod enrichment;
mod error;
mod http_client;
mod job_client;
mod models;
mod orchestrator;
mod scraper_trait;
mod scrapers;
mod source;
mod tracker;

#[cfg(test)]
mod testing;

use anyhow::Result;
use cascade::ExtractionCascade;
use clap::Parser;
use clock::TokioSleeper;
use config::{Config, PLACEHOLDER_APIFY_TOKEN};
use database::Database;
use enrichment::{LlmAnalyzer, NeutralAnalyzer, TrendAnalyzer};
use job_client::{ApifyApi, AsyncJobClient};
use orchestrator::{RunReport, ScrapeOrchestrator};
use reqwest::cookie::Jar;
use scraper_trait::ScraperRegistry;
use scrapers::{BrowserScraper, BrowserlessBrowser, HttpScraper, JobScraper};
use source::AccessMethod;
use std::sync::Arc;
use std::time::Duration;
use tracker::{ProgressTracker, SourceStatus};

#[derive(Parser, Debug)]
#[command(name = "trendscout")]
#[command(about = "Collects trending topics from social platforms", long_about = None)]
struct Args {
    /// Only run these platforms (repeatable, merged with PLATFORMS)
    #[arg(long = "platform")]
    platforms: Vec<String>,

    /// Fetch and extract a single source, without enrichment or persistence
    #[arg(long)]
    test_source: Option<String>,

    /// Print the N most recently stored trends and exit
    #[arg(long)]
    recent: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load or create config first (before logging is initialized)
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) if !std::path::Path::new(config::CONFIG_PATH).exists() => {
            eprintln!("No config file found ({}), creating default {}", e, config::CONFIG_PATH);
            Config::create_default()?;
            eprintln!("Please edit {} with your Apify token and browser endpoint", config::CONFIG_PATH);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    init_tracing(&config.tracing_level);

    if let Some(limit) = args.recent {
        return show_recent(&config, limit);
    }

    if let Some(name) = args.test_source {
        return test_source(&name, &config).await;
    }

    tracing::info!("Starting trendscout...");

    if config.job.apify_token == PLACEHOLDER_APIFY_TOKEN && config.has_access(AccessMethod::AsyncJob) {
        tracing::error!("Please set job.apify_token in {} (or APIFY_TOKEN)", config::CONFIG_PATH);
        return Ok(());
    }

    let mut platforms = config.platforms.clone();
    platforms.extend(args.platforms);

    if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(Database::new(&config.database_path)?);
    tracing::info!("Database initialized at {}", config.database_path);

    let analyzer = build_analyzer(&config);
    let registry = build_registry(&config);
    tracing::info!("Registered access paths: {:?}", registry.list_methods());

    let tracker = Arc::new(ProgressTracker::new());
    let cascade = ExtractionCascade::new(config.cascade.clone(), analyzer.clone());
    let orchestrator = ScrapeOrchestrator::new(tracker.clone(), registry, cascade, analyzer, db.clone())
        .with_delay(config.delay_range());

    let reporter = spawn_progress_reporter(tracker);
    let result = orchestrator.run_all(&config.shared_sources(), &platforms).await;
    reporter.abort();

    let outcome = result?;
    print_report(&outcome.report);

    match db.count() {
        Ok(total) => tracing::info!("Database holds {} trends", total),
        Err(e) => tracing::warn!("Could not count stored trends: {}", e),
    }

    Ok(())
}

/// Use RUST_LOG if set, otherwise the configured level.
fn init_tracing(configured: &str) {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
        tracing::info!("Logging level set from RUST_LOG environment variable");
        return;
    }

    let level = configured.to_lowercase();
    let max_level = match level.as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            eprintln!("Invalid tracing level '{}', using 'info'", level);
            tracing::Level::INFO
        }
    };

    tracing_subscriber::fmt().with_max_level(max_level).init();
    tracing::info!("Logging level set to: {} (from {})", level, config::CONFIG_PATH);
}

fn build_analyzer(config: &Config) -> Arc<dyn TrendAnalyzer> {
    match config.enrichment.api_key.as_deref() {
        Some(key) if !key.is_empty() => {
            let mut analyzer = LlmAnalyzer::new(key);
            if let Some(url) = config.enrichment.base_url.as_deref() {
                analyzer = analyzer.with_base_url(url);
            }
            if let Some(model) = config.enrichment.model.as_deref() {
                analyzer = analyzer.with_model(model);
            }
            Arc::new(analyzer)
        }
        _ => {
            tracing::info!("No LLM api key configured, trends get neutral annotations");
            Arc::new(NeutralAnalyzer)
        }
    }
}

fn build_registry(config: &Config) -> ScraperRegistry {
    let mut registry = ScraperRegistry::new();

    let cookie_jar = Arc::new(Jar::default());
    if std::path::Path::new(&config.cookies_path).exists() {
        let urls: Vec<String> = config.sources.iter().map(|s| s.url.clone()).collect();
        match http_client::load_cookies_from_file(&cookie_jar, &config.cookies_path, &urls) {
            Ok(_) => tracing::info!("Successfully loaded cookies from {}", config.cookies_path),
            Err(e) => tracing::warn!("Failed to load cookies from {}: {}", config.cookies_path, e),
        }
    } else {
        tracing::info!("No {} file found. You can export cookies from your browser to avoid captchas.", config.cookies_path);
    }
    registry.register(Arc::new(HttpScraper::new(&config.user_agent, Some(cookie_jar))));

    if let Some(base_url) = config.browser.base_url.as_deref() {
        let browser = BrowserlessBrowser::new(base_url, config.browser.token.as_deref());
        registry.register(Arc::new(BrowserScraper::new(Arc::new(browser), config.settle_timeout())));
    }

    if !config.job.apify_token.is_empty() {
        let api = ApifyApi::new(&config.job.apify_token).with_base_url(&config.job.base_url);
        let client = AsyncJobClient::new(Arc::new(api), Arc::new(TokioSleeper));
        registry.register(Arc::new(JobScraper::new(client, config.poll_policy())));
    }

    registry
}

fn spawn_progress_reporter(tracker: Arc<ProgressTracker>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;

            if !tracker.is_running() {
                continue;
            }
            let session = tracker.snapshot();
            let current = session
                .sources
                .iter()
                .find(|s| s.status == SourceStatus::Running)
                .map(|s| format!("{} ({}%)", s.name, s.percent))
                .unwrap_or_else(|| "waiting".to_string());
            tracing::info!(
                "Progress: {}% ({}/{} sources), current: {}",
                session.percent,
                session.completed_sources,
                session.sources.len(),
                current
            );
        }
    })
}

fn print_report(report: &RunReport) {
    println!("{}", "=".repeat(80));
    println!(
        "Run finished: {} trends, {} stored, {} failed to store",
        report.total_records, report.persisted, report.persistence_failures
    );
    println!(
        "Sources: {} completed, {} failed",
        report.count(SourceStatus::Completed),
        report.count(SourceStatus::Failed)
    );
    for source in &report.sources {
        println!(
            "  {:<20} {:?} - {} trends{}",
            source.name,
            source.status,
            source.record_count,
            source.error.as_deref().map(|e| format!(" ({})", e)).unwrap_or_default()
        );
    }
    if !report.errors.is_empty() {
        println!("\nErrors:");
        for error in &report.errors {
            println!("  - {}", error);
        }
    }
    println!("\nSummary:\n{}", report.summary);
    println!("{}", "=".repeat(80));
}

fn show_recent(config: &Config, limit: usize) -> Result<()> {
    let db = Database::new(&config.database_path)?;
    let rows = db.recent_trends(limit)?;
    println!("{} most recent trends", rows.len());
    println!("{}", "=".repeat(80));
    for row in rows {
        println!(
            "{} [{}] {} popularity={} category={} sentiment={} growth={} confidence={:.2}",
            row.captured_at.format("%Y-%m-%d %H:%M"),
            row.platform,
            row.tag,
            row.popularity.as_deref().unwrap_or("-"),
            row.category.as_deref().unwrap_or("-"),
            row.sentiment,
            row.predicted_growth,
            row.confidence
        );
    }
    Ok(())
}

/// Fetch and extract one configured source
async fn test_source(name: &str, config: &Config) -> Result<()> {
    let Some(source) = config.sources.iter().find(|s| s.matches_platform(name)) else {
        let available: Vec<&str> = config.sources.iter().map(|s| s.name.as_str()).collect();
        eprintln!("Unknown source: {}", name);
        eprintln!("Available sources: {}", available.join(", "));
        return Ok(());
    };

    println!("Testing source: {} ({} access)", source.name, source.access.as_str());
    println!("URL: {}", source.url);
    println!("{}", "=".repeat(80));

    let registry = build_registry(config);
    let cascade = ExtractionCascade::new(config.cascade.clone(), build_analyzer(config));

    let fetched = match registry.get(source.access) {
        Ok(scraper) => scraper.fetch(source).await,
        Err(e) => Err(e),
    };
    let cleanup = registry.cleanup_all().await;

    let content = match fetched {
        Ok(content) => content,
        Err(e) => {
            println!("Fetch failed: {}", e);
            return Ok(());
        }
    };
    cleanup?;
    println!("Fetched {} units of content", content.len_hint());

    let mut records = cascade.primary(&content, source);
    println!("Structured extraction: {} trends", records.len());
    if records.len() < config.cascade.primary_min.max(1) && content.is_document() {
        let outcome = cascade.run(&content, source).await;
        for (strategy, added) in &outcome.contributions {
            println!("  {:<20} +{}", strategy.name(), added);
        }
        if outcome.assisted_invoked {
            println!("  assisted extraction was invoked");
        }
        records = outcome.records;
    }

    println!("{}", "=".repeat(80));
    for (i, record) in records.iter().enumerate() {
        println!(
            "#{:<3} {} popularity={} category={}",
            i + 1,
            record.tag,
            record.popularity_label.as_deref().unwrap_or("-"),
            record.category.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
