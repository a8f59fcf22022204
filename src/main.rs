use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use chunky_scraper::app::ports::{CalendarStore, FetchOptions, Fetcher};
use chunky_scraper::domain::RunReport;
use chunky_scraper::infra::{HttpFetcher, InMemoryCalendar};
use chunky_scraper::logging;
use chunky_scraper::parsers::{ParserKind, ParserRegistry};
use chunky_scraper::pipeline::{notes, Normalizer, Orchestrator};
use chunky_scraper::registry::{Settings, SourceConfig, SourcesDocument};

#[derive(Parser)]
#[command(name = "chunky_scraper")]
#[command(about = "Bear event scraper feeding the chunky.dad city calendars")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the runtime settings file
    #[arg(long, default_value = "config/config.toml")]
    config: String,

    /// Path to the sources document (defaults to the one named in settings)
    #[arg(long)]
    sources: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every enabled source and sync the results to the city calendars
    Sync {
        /// Specific sources to run (comma-separated names)
        #[arg(long)]
        source: Option<String>,
        /// Report what would be written without touching any calendar
        #[arg(long)]
        dry_run: bool,
    },
    /// List the configured sources and any configuration problems
    Sources,
    /// Fetch one URL, run one parser over it and print the parsed events
    CheckUrl {
        url: String,
        /// Parser to use: eventbrite, bearracuda, furball, gaycities, generic, ical
        #[arg(long, default_value = "generic")]
        parser: ParserKind,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();

    let settings = Settings::load_or_default(&cli.config)
        .with_context(|| format!("failed to load settings from {}", cli.config))?;
    let sources_file = cli
        .sources
        .unwrap_or_else(|| settings.sources_file.clone());
    let document = SourcesDocument::load_from_file(&sources_file)?;

    match cli.command {
        Commands::Sync { source, dry_run } => {
            run_sync(&settings, document, source, dry_run).await?;
        }
        Commands::Sources => {
            list_sources(&document);
        }
        Commands::CheckUrl { url, parser } => {
            check_url(&settings, &document, &url, parser).await?;
        }
    }

    Ok(())
}

async fn run_sync(
    settings: &Settings,
    mut document: SourcesDocument,
    only: Option<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    if let Some(names) = only {
        let wanted: Vec<&str> = names.split(',').map(str::trim).collect();
        document.sources.retain(|s| wanted.contains(&s.name.as_str()));
        if document.sources.is_empty() {
            println!("⚠️  No configured source matches: {}", names);
            return Ok(());
        }
    }
    if dry_run {
        document.defaults.dry_run = true;
    }

    println!("🚀 Syncing {} source(s)...", document.sources.len());

    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(settings.fetch_policy())?);
    let calendar: Arc<dyn CalendarStore> = Arc::new(InMemoryCalendar::new());
    let orchestrator = Orchestrator::new(ParserRegistry::with_defaults(), fetcher, calendar);

    let report = orchestrator.run(&document).await;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    let took = report.completed_at - report.started_at;

    println!("\n📊 Sync results:");
    println!("   Total events: {}", report.total_events);
    println!("   Bear events: {}", report.bear_events);
    println!("   Duplicates removed: {}", report.duplicates_removed);
    println!("   Calendar writes: {}", report.calendar_writes);
    println!("   Took: {:.1}s", took.num_milliseconds() as f64 / 1000.0);
    if report.dry_run {
        println!("   (dry run: nothing was written)");
    }

    for source in &report.sources {
        println!(
            "   - {} [{}]: {} url(s) fetched, {} link(s) followed, {} event(s), {} bear",
            source.name,
            source.parser,
            source.urls_fetched,
            source.links_followed,
            source.events_found,
            source.bear_events,
        );
        for err in &source.errors {
            println!("       ⚠️  {}", err);
        }
    }

    if report.errors.is_empty() {
        println!("\n✅ Sync completed successfully");
    } else {
        warn!("{} errors encountered during sync", report.errors.len());
        println!("\n⚠️  Errors encountered:");
        for err in &report.errors {
            println!("   - {}", err);
        }
    }
}

fn list_sources(document: &SourcesDocument) {
    println!("📋 {} configured source(s):", document.sources.len());
    for source in &document.sources {
        let state = if source.enabled { "enabled" } else { "disabled" };
        println!(
            "   {} [{}] {} ({} url{})",
            source.name,
            source.parser,
            state,
            source.urls.len(),
            if source.urls.len() == 1 { "" } else { "s" },
        );
    }

    let problems = document.validate();
    if !problems.is_empty() {
        println!("\n⚠️  Configuration problems:");
        for problem in &problems {
            println!("   - {}", problem);
        }
    }
}

async fn check_url(
    settings: &Settings,
    document: &SourcesDocument,
    url: &str,
    kind: ParserKind,
) -> anyhow::Result<()> {
    println!("🔍 Fetching {url} with the {kind} parser...");

    let fetcher = HttpFetcher::new(settings.fetch_policy())?;
    let page = fetcher.fetch(url, &FetchOptions::default()).await;
    if !page.has_content() {
        let reason = page.error.as_deref().unwrap_or("empty response");
        error!(url, error = reason, "fetch failed");
        println!("❌ Fetch failed: {reason}");
        return Ok(());
    }

    let registry = ParserRegistry::with_defaults();
    let parser = registry
        .get(kind)
        .with_context(|| format!("no parser registered for {kind}"))?;

    // Borrow the config of a source that runs this parser so metadata and
    // city defaults apply; otherwise a minimal stand-in.
    let source: SourceConfig = match document.sources.iter().find(|s| s.parser == kind) {
        Some(existing) => existing.clone(),
        None => serde_json::from_value(serde_json::json!({
            "name": "check-url",
            "parser": kind.as_str(),
            "urls": [url],
        }))?,
    };

    let outcome = parser.parse_events(&page, &source, &document.cities);
    info!(
        events = outcome.events.len(),
        links = outcome.additional_links.len(),
        "parse complete"
    );

    if outcome.events.is_empty() {
        println!("📭 No events parsed from this page");
        return Ok(());
    }

    println!("\n📊 Parsed {} event(s):", outcome.events.len());
    let normalizer = Normalizer::new(&document.cities);
    for draft in outcome.events {
        let event = normalizer.normalize(draft, &source);
        println!("\n▶ {}", event.key);
        for line in notes::event_notes(&event).lines() {
            println!("   {line}");
        }
    }

    if !outcome.additional_links.is_empty() {
        println!("\n🔗 {} additional link(s):", outcome.additional_links.len());
        for link in &outcome.additional_links {
            println!("   - {link}");
        }
    }

    Ok(())
}
