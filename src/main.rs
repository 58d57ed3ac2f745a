//! # Awful News Digest
//!
//! Aggregates articles from pluggable crawler scripts, normalizes their
//! content into plain text, summarizes it through an LLM and publishes one
//! digest per source per day.
//!
//! ## Usage
//!
//! ```sh
//! awful_news_digest run -n 5        # one batch now
//! awful_news_digest daemon          # daily at `daily_time`
//! awful_news_digest sources list
//! awful_news_digest stats
//! ```
//!
//! ## Architecture
//!
//! Each batch walks the active sources one at a time:
//! 1. **Crawling**: run the source's crawler process, parse its JSON records
//! 2. **Dedup**: skip URLs the store already holds in a completed state
//! 3. **Acquisition**: fetch (direct, then proxy), extract text, attach the
//!    comment thread, cap the length, persist the summary input
//! 4. **Digest**: summarize extracted articles and publish the source's digest
//!
//! Every article's progress is recorded in a SQLite store, so an interrupted
//! or failed article is picked up again by the next batch.

use chrono::NaiveTime;
use clap::Parser;
use std::error::Error;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod acquire;
mod api;
mod cli;
mod config;
mod crawler;
mod daemon;
mod error;
mod models;
mod outputs;
mod pipeline;
mod store;
mod utils;

use acquire::{CommentFetcher, ContentFetcher, FetchOptions, HttpTransport, LengthGovernor};
use api::{AwfulSummarizer, SummaryLimits};
use cli::{Cli, Command, SourcesCommand};
use config::{parse_daily_time, AppConfig};
use crawler::ProcessCrawlerRunner;
use daemon::{listen_for_signals, run_daily, PidLock};
use models::Source;
use outputs::json::JsonDigestPublisher;
use pipeline::{Aggregator, ArtifactLayout, DigestStage, RunOptions, RunReport, Shutdown};
use store::ArticleStore;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init ---
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!("awful_news_digest starting up");
    debug!(?args, "Parsed CLI arguments");

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(proxy_url) = args.proxy_url {
        config.proxy_url = Some(proxy_url);
    }

    let store = ArticleStore::open(&config.database_path)?;
    for source in &config.sources {
        if store.upsert_source(source)? {
            info!(source = %source.name, "Registered source from configuration");
        }
    }

    match args.command {
        Command::Run {
            limit,
            debug,
            source,
            extract_only,
        } => {
            let sources = select_sources(&store, source.as_deref())?;
            let shutdown = Shutdown::new();
            listen_for_signals(shutdown.clone());
            let options = RunOptions {
                limit,
                debug,
                max_attempts: config.max_attempts,
            };

            let report = run_batch(&config, &store, &sources, options, extract_only, &shutdown).await?;
            let failures = report.crawler_failures();
            if failures > 0 {
                error!(failures, "Some sources failed at crawler level");
                return Err(format!("{failures} source(s) failed at crawler level").into());
            }
        }
        Command::Daemon { daily_time } => {
            let at = parse_daily_time(daily_time.as_deref().unwrap_or(&config.daily_time))?;
            run_daemon(&config, &store, at).await?;
        }
        Command::Sources { action } => manage_sources(&store, action)?,
        Command::Stats => print_stats(&store)?,
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

/// Active sources, or the single named one (even when disabled).
fn select_sources(store: &ArticleStore, name: Option<&str>) -> Result<Vec<Source>, Box<dyn Error>> {
    let Some(name) = name else {
        return Ok(store.list_sources(true)?);
    };
    match store.get_source(name)? {
        Some(mut source) => {
            if !source.active {
                warn!(source = %source.name, "Source is disabled; running it because it was named");
                source.active = true;
            }
            Ok(vec![source])
        }
        None => Err(format!("unknown source `{name}`").into()),
    }
}

/// Build the production collaborators and run one batch over `sources`.
#[instrument(level = "info", skip_all, fields(sources = sources.len(), extract_only = extract_only))]
async fn run_batch(
    config: &AppConfig,
    store: &ArticleStore,
    sources: &[Source],
    options: RunOptions,
    extract_only: bool,
    shutdown: &Shutdown,
) -> Result<RunReport, Box<dyn Error>> {
    ensure_writable_dir(&config.data_dir).await?;
    if options.debug {
        ensure_writable_dir(&config.scratch_dir).await?;
    }

    let fetch_opts = FetchOptions {
        user_agent: config.user_agent.clone(),
        timeout: config.fetch_timeout(),
        connect_timeout: config.connect_timeout(),
        max_bytes: config.max_document_bytes,
    };
    let direct = HttpTransport::direct(&fetch_opts)?;
    let proxy = config
        .proxy_url
        .as_deref()
        .map(|url| HttpTransport::proxied(&fetch_opts, url))
        .transpose()?;
    if proxy.is_none() {
        info!("No proxy configured; failed fetches will not be retried");
    }

    let aggregator = Aggregator::new(
        store,
        ProcessCrawlerRunner::new(&config.script_root, config.crawler_timeout()),
        ContentFetcher::new(direct, proxy, config.retry_delay()),
        ArtifactLayout::new(&config.data_dir, &config.scratch_dir),
    )
    .with_comments(CommentFetcher::new(config.comments_api_base.as_str()))
    .with_governor(LengthGovernor::new(config.max_summary_text_length))
    .with_options(options)
    .with_shutdown(shutdown.clone());

    let stage = if extract_only {
        info!("Extract-only run; summaries and digests skipped");
        None
    } else {
        let limits = SummaryLimits {
            article_chars: config.article_summary_chars,
            comment_chars: config.comment_summary_chars,
        };
        match AwfulSummarizer::load(&config.summarizer, limits).await {
            Ok(summarizer) => Some(DigestStage::new(
                summarizer,
                JsonDigestPublisher::new(&config.digest_dir),
            )),
            Err(e) => {
                error!(error = %e, "Summarizer unavailable; running extraction only");
                None
            }
        }
    };

    let report = aggregator.run_all(sources, stage.as_ref()).await?;
    for s in &report.sources {
        info!(
            source = %s.source,
            candidates = s.candidates,
            new = s.new,
            retried = s.retried,
            skipped = s.skipped,
            exhausted = s.exhausted,
            extracted = s.extracted,
            failed = s.failed,
            summarized = s.digest.as_ref().map_or(0, |d| d.summarized),
            published = s.digest.as_ref().and_then(|d| d.published.as_deref()).unwrap_or("-"),
            crawler_error = s.crawler_error.as_deref().unwrap_or("-"),
            interrupted = s.interrupted,
            "Source summary"
        );
    }
    Ok(report)
}

/// Hold the single-instance lock and run the batch once a day.
async fn run_daemon(config: &AppConfig, store: &ArticleStore, at: NaiveTime) -> Result<(), Box<dyn Error>> {
    let _lock = PidLock::acquire(&config.pid_file)?;
    let shutdown = Shutdown::new();
    listen_for_signals(shutdown.clone());
    let options = RunOptions {
        limit: None,
        debug: false,
        max_attempts: config.max_attempts,
    };

    let shutdown_ref = &shutdown;
    run_daily(at, shutdown_ref, move || async move {
        let sources = match store.list_sources(true) {
            Ok(sources) => sources,
            Err(e) => {
                error!(error = %e, "Cannot list sources; skipping this batch");
                return;
            }
        };
        match run_batch(config, store, &sources, options, false, shutdown_ref).await {
            Ok(report) => info!(
                extracted = report.extracted(),
                failed = report.failed(),
                crawler_failures = report.crawler_failures(),
                "Scheduled batch finished"
            ),
            Err(e) => error!(error = %e, "Scheduled batch failed"),
        }
    })
    .await;
    Ok(())
}

fn manage_sources(store: &ArticleStore, action: SourcesCommand) -> Result<(), Box<dyn Error>> {
    let unknown = |name: &str| -> Box<dyn Error> { format!("unknown source `{name}`").into() };
    match action {
        SourcesCommand::List => {
            for s in store.list_sources(false)? {
                println!(
                    "{:<24} {:<8} {:<40} {}",
                    s.name,
                    if s.active { "active" } else { "disabled" },
                    s.crawler_command,
                    s.media_path.as_deref().unwrap_or("-")
                );
            }
        }
        SourcesCommand::Add {
            name,
            command,
            media,
        } => {
            let source = Source {
                name,
                crawler_command: command,
                active: true,
                media_path: media,
            };
            let verb = if store.upsert_source(&source)? { "Added" } else { "Updated" };
            println!("{verb} source {}", source.name);
        }
        SourcesCommand::Enable { name } => {
            if !store.set_source_active(&name, true)? {
                return Err(unknown(&name));
            }
            println!("Enabled {name}");
        }
        SourcesCommand::Disable { name } => {
            if !store.set_source_active(&name, false)? {
                return Err(unknown(&name));
            }
            println!("Disabled {name}");
        }
        SourcesCommand::Media { name, path } => {
            if !store.set_source_media(&name, &path)? {
                return Err(unknown(&name));
            }
            println!("Set media for {name} to {path}");
        }
    }
    Ok(())
}

fn print_stats(store: &ArticleStore) -> Result<(), Box<dyn Error>> {
    let counts = store.status_counts()?;
    if counts.is_empty() {
        println!("No articles yet");
        return Ok(());
    }
    for (source, by_status) in counts {
        let total: u64 = by_status.values().sum();
        let detail = by_status
            .iter()
            .map(|(status, n)| format!("{status}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{source:<24} total={total:<6} {detail}");
    }
    println!("{:<24} total={}", "(all)", store.count_articles(None)?);
    Ok(())
}
