//! Summarize extracted articles and publish the source's daily digest.
//!
//! Runs after acquisition for each source. Every `extracted` article is
//! summarized from its persisted summary input; the summary is written next
//! to the input and the article moves to `summarized`. A summarizer failure
//! leaves the article `extracted` for the next run. The articles summarized
//! in this pass form the digest, which is published once. Publishing is
//! all-or-nothing and never touches article status.

use super::layout::summary_output_path;
use super::shutdown::Shutdown;
use crate::acquire::governor::split_payload;
use crate::acquire::COMMENTS_SEPARATOR;
use crate::api::{Summarize, SummaryRole};
use crate::error::ServiceError;
use crate::models::{Article, ArticleStatus, Digest, DigestEntry, Source};
use crate::outputs::Publish;
use crate::store::{ArticleStore, StoreResult};
use crate::utils::write_atomic;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of the digest stage for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestReport {
    pub summarized: usize,
    /// Articles whose summarization failed; they stay `extracted`.
    pub failed: usize,
    /// Receipt location of the published digest.
    pub published: Option<String>,
    pub publish_error: Option<String>,
}

#[derive(Debug)]
pub struct DigestStage<S, P> {
    summarizer: S,
    publisher: P,
}

impl<S, P> DigestStage<S, P>
where
    S: Summarize,
    P: Publish,
{
    pub fn new(summarizer: S, publisher: P) -> Self {
        Self {
            summarizer,
            publisher,
        }
    }

    /// Summarize every `extracted` article of `source` and publish the digest.
    ///
    /// # Errors
    ///
    /// Only store failures are returned; summarizer and publisher failures
    /// are logged and reported.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    pub async fn run(
        &self,
        store: &ArticleStore,
        source: &Source,
        shutdown: &Shutdown,
    ) -> StoreResult<DigestReport> {
        let mut report = DigestReport::default();
        let pending = store.articles_with_status(&source.name, ArticleStatus::Extracted)?;
        if pending.is_empty() {
            debug!("No extracted articles awaiting summaries");
            return Ok(report);
        }
        info!(count = pending.len(), "Summarizing extracted articles");

        let mut entries = Vec::with_capacity(pending.len());
        for article in pending {
            if shutdown.is_requested() {
                warn!("Shutdown requested; remaining articles stay extracted");
                break;
            }
            match self.summarize_article(&article).await {
                Ok((entry, summary_path)) => {
                    store.mark_summarized(article.id, &summary_path.display().to_string())?;
                    report.summarized += 1;
                    entries.push(entry);
                }
                Err(e) => {
                    warn!(id = article.id, url = %article.url, error = %e, "Summarization failed; article stays extracted");
                    report.failed += 1;
                }
            }
        }

        if entries.is_empty() {
            info!("Nothing summarized; no digest to publish");
            return Ok(report);
        }

        let digest = Digest {
            source: source.name.clone(),
            local_date: Local::now().date_naive().to_string(),
            cover_media: source.media_path.clone(),
            entries,
        };
        match self.publisher.publish(&digest).await {
            Ok(receipt) => {
                info!(location = %receipt.location, entries = receipt.entries, "Digest published");
                report.published = Some(receipt.location);
            }
            Err(e) => {
                error!(error = %e, "Publishing failed; today's digest did not go out");
                report.publish_error = Some(e.to_string());
            }
        }
        Ok(report)
    }

    async fn summarize_article(&self, article: &Article) -> Result<(DigestEntry, PathBuf), ServiceError> {
        let input = article.local_text_path.as_deref().ok_or_else(|| {
            ServiceError::Summarizer(format!("article {} has no summary input", article.id))
        })?;
        let payload = fs::read_to_string(input).await?;
        let (text, comments) = split_payload(&payload);

        let summary = self.summarizer.summarize(text, SummaryRole::Article).await?;
        let comment_summary = match comments.filter(|c| !c.trim().is_empty()) {
            Some(c) => Some(self.summarizer.summarize(c, SummaryRole::Comments).await?),
            None => None,
        };

        let mut body = summary.clone();
        if let Some(cs) = &comment_summary {
            body.push_str(COMMENTS_SEPARATOR);
            body.push_str(cs);
        }
        let path = summary_output_path(Path::new(input));
        write_atomic(&path, body.as_bytes()).await?;
        debug!(id = article.id, path = %path.display(), "Wrote summary");

        Ok((
            DigestEntry {
                title: article.title.clone(),
                url: article.url.clone(),
                published_date: article.published_date.clone(),
                summary,
                comment_summary,
            },
            path,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeSummarizer;
    use crate::models::CandidateArticle;
    use crate::outputs::testing::RecordingPublisher;
    use tempfile::TempDir;

    fn source() -> Source {
        Source {
            name: "HN".to_string(),
            crawler_command: "python crawler.py".to_string(),
            active: true,
            media_path: Some("./media/hn.jpg".to_string()),
        }
    }

    /// Insert an article and move it to `extracted` with `payload` on disk.
    fn extracted(store: &ArticleStore, tmp: &TempDir, n: usize, payload: &str) -> Article {
        let candidate = CandidateArticle {
            title: format!("Article {n}"),
            url: format!("http://x/{n}"),
            published_date: "2025-01-01T00:00:00Z".to_string(),
            comments_url: None,
        };
        let article = store.insert_discovered("HN", &candidate).unwrap();
        let path = tmp.path().join(format!("{n}.txt"));
        std::fs::write(&path, payload).unwrap();
        store.mark_fetched(article.id).unwrap();
        store
            .mark_extracted(article.id, &path.display().to_string())
            .unwrap();
        store.get_article(article.id).unwrap()
    }

    #[tokio::test]
    async fn test_summaries_are_written_and_published() {
        let store = ArticleStore::open_in_memory().unwrap();
        let tmp = TempDir::new().unwrap();
        let plain = extracted(&store, &tmp, 1, "Article body");
        let with_comments = extracted(
            &store,
            &tmp,
            2,
            &format!("Second body{COMMENTS_SEPARATOR}  [alice]: Agreed"),
        );
        let stage = DigestStage::new(FakeSummarizer::default(), RecordingPublisher::default());

        let report = stage.run(&store, &source(), &Shutdown::new()).await.unwrap();
        assert_eq!(report.summarized, 2);
        assert_eq!(report.published.as_deref(), Some("memory://HN"));

        let summarized = store.get_article(with_comments.id).unwrap();
        assert_eq!(summarized.status, ArticleStatus::Summarized);
        let summary_path = summarized.summary_path.unwrap();
        assert!(summary_path.ends_with("2.summary.txt"));
        let written = std::fs::read_to_string(&summary_path).unwrap();
        assert!(written.starts_with("Article summary of 11 chars"));
        assert!(written.ends_with("Comments summary of 17 chars"));

        let calls = stage.summarizer.calls.borrow();
        assert_eq!(calls.len(), 3);

        let published = stage.publisher.published.borrow();
        let digest = &published[0];
        assert_eq!(digest.cover_media.as_deref(), Some("./media/hn.jpg"));
        assert_eq!(digest.entries.len(), 2);
        assert_eq!(digest.entries[0].url, plain.url);
        assert_eq!(digest.entries[0].comment_summary, None);
        assert!(digest.entries[1].comment_summary.is_some());
    }

    #[tokio::test]
    async fn test_summarizer_failure_keeps_article_extracted() {
        let store = ArticleStore::open_in_memory().unwrap();
        let tmp = TempDir::new().unwrap();
        let article = extracted(&store, &tmp, 1, "Body");
        let stage = DigestStage::new(FakeSummarizer::failing(), RecordingPublisher::default());

        let report = stage.run(&store, &source(), &Shutdown::new()).await.unwrap();
        assert_eq!((report.summarized, report.failed), (0, 1));
        assert_eq!(report.published, None);
        assert!(stage.publisher.published.borrow().is_empty());
        assert_eq!(store.get_article(article.id).unwrap().status, ArticleStatus::Extracted);
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_articles_summarized() {
        let store = ArticleStore::open_in_memory().unwrap();
        let tmp = TempDir::new().unwrap();
        let article = extracted(&store, &tmp, 1, "Body");
        let publisher = RecordingPublisher {
            fail: true,
            ..RecordingPublisher::default()
        };
        let stage = DigestStage::new(FakeSummarizer::default(), publisher);

        let report = stage.run(&store, &source(), &Shutdown::new()).await.unwrap();
        assert_eq!(report.summarized, 1);
        assert!(report.publish_error.is_some());
        assert_eq!(store.get_article(article.id).unwrap().status, ArticleStatus::Summarized);
    }

    #[tokio::test]
    async fn test_missing_input_file_is_a_summary_failure() {
        let store = ArticleStore::open_in_memory().unwrap();
        let tmp = TempDir::new().unwrap();
        let article = extracted(&store, &tmp, 1, "Body");
        std::fs::remove_file(article.local_text_path.as_deref().unwrap()).unwrap();
        let stage = DigestStage::new(FakeSummarizer::default(), RecordingPublisher::default());

        let report = stage.run(&store, &source(), &Shutdown::new()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(store.get_article(article.id).unwrap().status, ArticleStatus::Extracted);
    }

    #[tokio::test]
    async fn test_nothing_extracted_publishes_nothing() {
        let store = ArticleStore::open_in_memory().unwrap();
        let stage = DigestStage::new(FakeSummarizer::default(), RecordingPublisher::default());

        let report = stage.run(&store, &source(), &Shutdown::new()).await.unwrap();
        assert_eq!(report, DigestReport::default());
        assert!(stage.publisher.published.borrow().is_empty());
    }
}
