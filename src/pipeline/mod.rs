//! The aggregation run: crawl, dedup, fetch, extract, persist.
//!
//! One run walks the active sources in order and, for each, the new
//! articles in crawler order. Nothing runs in parallel.
//!
//! ```text
//! for each active source:
//!     candidates <- crawler                      (failure: log, next source)
//!     pending    <- candidates not yet extracted (dedup by (source, url))
//!     pending    <- first `limit` of pending
//!     for each pending article:
//!         discovered -> fetched -> extracted     (failure: mark failed, next article)
//!     summarize extracted articles, publish digest (optional)
//! ```
//!
//! # Failure Isolation
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Crawler crash, timeout, bad output | Source skipped for this run |
//! | Fetch or extraction error | Article marked `failed`, retried next run |
//! | Comment thread unavailable | Article persisted without comments |
//! | Summarizer error | Article stays `extracted`, retried next run |
//! | Publisher error | Digest not sent; article status untouched |
//! | Store error | Run aborted |
//!
//! Re-running is safe: articles already `extracted` or `summarized` are
//! never fetched again, while `discovered`, `fetched` and `failed` ones are
//! picked up again (reusing their record) until they succeed or reach the
//! optional attempt cap.

pub mod digest;
pub mod layout;
pub mod shutdown;

pub use digest::{DigestReport, DigestStage};
pub use layout::ArtifactLayout;
pub use shutdown::Shutdown;

use crate::acquire::comments::HN_ITEMS_API;
use crate::acquire::fetcher::Document;
use crate::acquire::{extract, CommentFetcher, ContentFetcher, LengthGovernor, Transport};
use crate::api::Summarize;
use crate::config::MAX_SUMMARY_TEXT_LENGTH;
use crate::crawler::CrawlerRunner;
use crate::error::ArticleError;
use crate::models::{Article, CandidateArticle, Source};
use crate::outputs::Publish;
use crate::store::{ArticleStore, StoreResult};
use crate::utils::write_atomic;
use chrono::Utc;
use itertools::Itertools;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Per-run knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Process at most this many articles per source.
    pub limit: Option<usize>,
    /// Also dump uncapped extracted text to the scratch directory.
    pub debug: bool,
    /// Give up on an article after this many attempts.
    pub max_attempts: Option<u32>,
}

/// What happened to one source during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceReport {
    pub source: String,
    pub candidates: usize,
    /// Articles seen for the first time.
    pub new: usize,
    /// Previously failed or interrupted articles picked up again.
    pub retried: usize,
    /// Already extracted or summarized.
    pub skipped: usize,
    /// Not retried because the attempt cap was reached.
    pub exhausted: usize,
    pub extracted: usize,
    pub failed: usize,
    pub crawler_error: Option<String>,
    pub interrupted: bool,
    pub digest: Option<DigestReport>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn crawler_failures(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.crawler_error.is_some())
            .count()
    }

    pub fn extracted(&self) -> usize {
        self.sources.iter().map(|s| s.extracted).sum()
    }

    pub fn failed(&self) -> usize {
        self.sources.iter().map(|s| s.failed).sum()
    }
}

enum Pending {
    New(CandidateArticle),
    Retry(Article, CandidateArticle),
}

/// Composes crawler, fetcher, extractor, comment fetcher and length governor
/// over the article store.
pub struct Aggregator<'s, R, T> {
    store: &'s ArticleStore,
    crawler: R,
    fetcher: ContentFetcher<T>,
    comments: CommentFetcher,
    governor: LengthGovernor,
    layout: ArtifactLayout,
    options: RunOptions,
    shutdown: Shutdown,
}

impl<'s, R, T> Aggregator<'s, R, T>
where
    R: CrawlerRunner,
    T: Transport,
{
    pub fn new(
        store: &'s ArticleStore,
        crawler: R,
        fetcher: ContentFetcher<T>,
        layout: ArtifactLayout,
    ) -> Self {
        Self {
            store,
            crawler,
            fetcher,
            comments: CommentFetcher::new(HN_ITEMS_API),
            governor: LengthGovernor::new(MAX_SUMMARY_TEXT_LENGTH),
            layout,
            options: RunOptions::default(),
            shutdown: Shutdown::new(),
        }
    }

    pub fn with_comments(mut self, comments: CommentFetcher) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_governor(mut self, governor: LengthGovernor) -> Self {
        self.governor = governor;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run every active source in `sources`, then (when `digest` is given)
    /// summarize and publish each source's newly extracted articles.
    ///
    /// # Errors
    ///
    /// Only [`StoreError`](crate::error::StoreError)s escape; everything
    /// else is recorded in the report.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn run_all<S, P>(
        &self,
        sources: &[Source],
        digest: Option<&DigestStage<S, P>>,
    ) -> StoreResult<RunReport>
    where
        S: Summarize,
        P: Publish,
    {
        let t0 = Instant::now();
        let mut report = RunReport::default();

        for source in sources {
            if self.shutdown.is_requested() {
                warn!(source = %source.name, "Shutdown requested; not starting further sources");
                break;
            }
            if !source.active {
                debug!(source = %source.name, "Source inactive; skipping");
                continue;
            }

            let mut source_report = self.run_source(source).await?;
            if let Some(stage) = digest {
                source_report.digest = Some(stage.run(self.store, source, &self.shutdown).await?);
            }
            report.sources.push(source_report);
        }

        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            extracted = report.extracted(),
            failed = report.failed(),
            crawler_failures = report.crawler_failures(),
            "Run complete"
        );
        Ok(report)
    }

    /// Crawl one source and take its new articles to `extracted`.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    pub async fn run_source(&self, source: &Source) -> StoreResult<SourceReport> {
        let mut report = SourceReport {
            source: source.name.clone(),
            ..SourceReport::default()
        };

        let candidates = match self.crawler.run(source).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Crawler failed; skipping source for this run");
                report.crawler_error = Some(e.to_string());
                return Ok(report);
            }
        };
        report.candidates = candidates.len();

        let pending = self.select_pending(source, candidates, &mut report)?;
        info!(
            candidates = report.candidates,
            new = report.new,
            retried = report.retried,
            skipped = report.skipped,
            exhausted = report.exhausted,
            "Selected articles to process"
        );

        for item in pending {
            if self.shutdown.is_requested() {
                warn!("Shutdown requested; leaving remaining articles for the next run");
                report.interrupted = true;
                break;
            }
            let article = match item {
                Pending::New(candidate) => self.store.insert_discovered(&source.name, &candidate)?,
                Pending::Retry(existing, candidate) => self.store.begin_retry(&existing, &candidate)?,
            };
            if self.process_article(&article).await? {
                report.extracted += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(extracted = report.extracted, failed = report.failed, "Source done");
        Ok(report)
    }

    /// Dedup candidates against the store and apply the per-run limit.
    fn select_pending(
        &self,
        source: &Source,
        candidates: Vec<CandidateArticle>,
        report: &mut SourceReport,
    ) -> StoreResult<Vec<Pending>> {
        let mut pending = Vec::new();
        for candidate in candidates.into_iter().unique_by(|c| c.url.clone()) {
            if candidate.url.trim().is_empty() {
                warn!(title = %candidate.title, "Candidate has no URL; ignored");
                continue;
            }
            match self.store.find_article(&source.name, &candidate.url)? {
                None => pending.push(Pending::New(candidate)),
                Some(existing) if existing.status.is_completed() => {
                    debug!(url = %candidate.url, status = %existing.status, "Already processed");
                    report.skipped += 1;
                }
                Some(existing)
                    if self
                        .options
                        .max_attempts
                        .is_some_and(|max| existing.attempts >= max) =>
                {
                    warn!(
                        url = %candidate.url,
                        attempts = existing.attempts,
                        last_error = existing.last_error.as_deref().unwrap_or(""),
                        "Attempt limit reached; not retrying"
                    );
                    report.exhausted += 1;
                }
                Some(existing) => pending.push(Pending::Retry(existing, candidate)),
            }
        }

        if let Some(limit) = self.options.limit {
            if pending.len() > limit {
                info!(limit, available = pending.len(), "Capping articles for this run");
                pending.truncate(limit);
            }
        }

        report.new = pending.iter().filter(|p| matches!(p, Pending::New(_))).count();
        report.retried = pending.len() - report.new;
        Ok(pending)
    }

    /// Returns whether the article reached `extracted`.
    #[instrument(level = "info", skip_all, fields(id = article.id, url = %article.url))]
    async fn process_article(&self, article: &Article) -> StoreResult<bool> {
        let doc = match self.fetcher.fetch(&article.url).await {
            Ok(doc) => doc,
            Err(e) => return self.fail(article, &ArticleError::from(e)),
        };
        self.store.mark_fetched(article.id)?;

        match self.extract_and_persist(article, &doc).await {
            Ok(path) => {
                self.store.mark_extracted(article.id, &path.display().to_string())?;
                info!(path = %path.display(), "Article extracted");
                Ok(true)
            }
            Err(e) => self.fail(article, &e),
        }
    }

    async fn extract_and_persist(
        &self,
        article: &Article,
        doc: &Document,
    ) -> Result<PathBuf, ArticleError> {
        let text = extract(doc)?;
        if self.options.debug {
            self.dump_raw(article, &text).await;
        }

        let comments = match article.comments_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => match self.comments.fetch(&self.fetcher, url).await {
                Ok(comments) => comments,
                Err(e) => {
                    warn!(comments_url = %url, error = %e, "Comments unavailable; continuing without them");
                    None
                }
            },
            None => None,
        };

        let payload = self.governor.compose(text, comments);
        let path = self.layout.summary_input_path(article);
        write_atomic(&path, payload.as_bytes()).await?;
        debug!(path = %path.display(), chars = payload.chars().count(), "Persisted summary input");
        Ok(path)
    }

    async fn dump_raw(&self, article: &Article, text: &str) {
        let path = self.layout.debug_dump_path(article, Utc::now());
        match write_atomic(&path, text.as_bytes()).await {
            Ok(()) => debug!(path = %path.display(), "Wrote raw text dump"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write raw text dump"),
        }
    }

    fn fail(&self, article: &Article, err: &ArticleError) -> StoreResult<bool> {
        warn!(
            id = article.id,
            url = %article.url,
            attempts = article.attempts,
            error = %err,
            "Article failed; will be retried on the next run"
        );
        self.store.mark_failed(article.id, &err.to_string())?;
        Ok(false)
    }
}
