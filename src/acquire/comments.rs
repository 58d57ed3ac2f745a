//! Discussion threads for sources that advertise a `comments_url`.
//!
//! Hacker News threads are read from the structured items API rather than
//! scraped: the item id is taken from the `comments_url` and the JSON tree
//! is flattened depth-first, so comments keep their original order. Any
//! other comments link is treated as an ordinary document.
//!
//! Comments are best-effort: callers log failures and carry on without them.

use super::extractor::{extract, html_to_text};
use super::fetcher::{ContentFetcher, Transport};
use crate::error::{ArticleError, FetchError};
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

/// Public Hacker News items API; `/{id}` returns a story with its comment tree.
pub const HN_ITEMS_API: &str = "https://hn.algolia.com/api/v1/items";

/// Where a thread can be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentThread {
    /// Item id of a Hacker News story.
    HackerNews(u64),
    /// Any other discussion page.
    Page(String),
}

impl CommentThread {
    /// Classify a crawler-supplied `comments_url`.
    pub fn from_url(comments_url: &str) -> Self {
        Url::parse(comments_url)
            .ok()
            .filter(|u| u.host_str() == Some("news.ycombinator.com") && u.path() == "/item")
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "id")
                    .and_then(|(_, v)| v.parse().ok())
            })
            .map(CommentThread::HackerNews)
            .unwrap_or_else(|| CommentThread::Page(comments_url.to_string()))
    }
}

/// One node of the items API response.
#[derive(Debug, Deserialize)]
struct ThreadItem {
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    children: Vec<ThreadItem>,
}

/// Reads comment threads through a [`ContentFetcher`].
#[derive(Debug, Clone)]
pub struct CommentFetcher {
    api_base: String,
}

impl CommentFetcher {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch and flatten the thread behind `comments_url`.
    ///
    /// Returns `Ok(None)` when the thread exists but has no comments.
    #[instrument(level = "info", skip_all, fields(%comments_url))]
    pub async fn fetch<T: Transport>(
        &self,
        fetcher: &ContentFetcher<T>,
        comments_url: &str,
    ) -> Result<Option<String>, ArticleError> {
        let text = match CommentThread::from_url(comments_url) {
            CommentThread::HackerNews(id) => {
                let api_url = format!("{}/{}", self.api_base, id);
                debug!(%api_url, "Reading thread from items API");
                let raw = fetcher.get_raw(&api_url).await?;
                let root: ThreadItem = serde_json::from_slice(&raw.body)
                    .map_err(|e| FetchError::Transport(format!("malformed thread JSON: {e}")))?;
                flatten_thread(&root)
            }
            CommentThread::Page(url) => {
                let doc = fetcher.fetch(&url).await?;
                extract(&doc)?
            }
        };

        if text.is_empty() {
            info!("Thread has no comments");
            Ok(None)
        } else {
            info!(chars = text.chars().count(), "Fetched comments");
            Ok(Some(text))
        }
    }
}

/// Flatten a thread in pre-order as `[author]: text` blocks separated by
/// blank lines. Replies are indented two spaces per level.
fn flatten_thread(root: &ThreadItem) -> String {
    let mut lines = Vec::new();
    collect(root, 0, &mut lines);
    lines.join("\n\n")
}

fn collect(item: &ThreadItem, depth: usize, lines: &mut Vec<String>) {
    if let Some(body) = item.text.as_deref() {
        let body = html_to_text(body);
        if !body.is_empty() {
            let author = item.author.as_deref().unwrap_or("anonymous");
            lines.push(format!("{}[{}]: {}", "  ".repeat(depth), author, body));
        }
    }
    for child in &item.children {
        collect(child, depth + 1, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::fetcher::testing::ScriptedTransport;
    use std::time::Duration;

    const THREAD: &str = r#"{
        "id": 1, "author": "op", "text": null,
        "children": [
            {"author": "alice", "text": "<p>First &amp; foremost</p>", "children": [
                {"author": "bob", "text": "Reply to alice", "children": []}
            ]},
            {"author": null, "text": "", "children": []},
            {"author": "carol", "text": "Second top-level", "children": []}
        ]
    }"#;

    #[test]
    fn test_thread_classification() {
        assert_eq!(
            CommentThread::from_url("https://news.ycombinator.com/item?id=42"),
            CommentThread::HackerNews(42)
        );
        assert_eq!(
            CommentThread::from_url("https://news.ycombinator.com/item?id=abc"),
            CommentThread::Page("https://news.ycombinator.com/item?id=abc".to_string())
        );
        assert_eq!(
            CommentThread::from_url("https://example.com/item?id=42"),
            CommentThread::Page("https://example.com/item?id=42".to_string())
        );
    }

    #[test]
    fn test_flatten_preserves_order_and_skips_empty() {
        let root: ThreadItem = serde_json::from_str(THREAD).unwrap();
        let text = flatten_thread(&root);
        assert_eq!(
            text,
            "  [alice]: First & foremost\n\n    [bob]: Reply to alice\n\n  [carol]: Second top-level"
        );
    }

    #[tokio::test]
    async fn test_fetch_hacker_news_thread() {
        let direct = ScriptedTransport::default().json("https://api.test/items/42", THREAD);
        let fetcher = ContentFetcher::new(direct, None, Duration::ZERO);
        let comments = CommentFetcher::new("https://api.test/items/");

        let text = comments
            .fetch(&fetcher, "https://news.ycombinator.com/item?id=42")
            .await
            .unwrap()
            .unwrap();
        assert!(text.contains("[alice]: First & foremost"));
    }

    #[tokio::test]
    async fn test_empty_thread_is_none() {
        let direct = ScriptedTransport::default()
            .json("https://api.test/items/7", r#"{"author":"op","children":[]}"#);
        let fetcher = ContentFetcher::new(direct, None, Duration::ZERO);
        let comments = CommentFetcher::new("https://api.test/items");

        let result = comments
            .fetch(&fetcher, "https://news.ycombinator.com/item?id=7")
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_other_comment_pages_are_extracted() {
        let direct = ScriptedTransport::default()
            .html("https://forum.test/t/1", "<html><body><p>Nice post</p></body></html>");
        let fetcher = ContentFetcher::new(direct, None, Duration::ZERO);
        let comments = CommentFetcher::new("https://api.test/items");

        let text = comments
            .fetch(&fetcher, "https://forum.test/t/1")
            .await
            .unwrap();
        assert_eq!(text.as_deref(), Some("Nice post"));
    }

    #[tokio::test]
    async fn test_malformed_thread_json_is_an_error() {
        let direct = ScriptedTransport::default().json("https://api.test/items/9", "not json");
        let fetcher = ContentFetcher::new(direct, None, Duration::ZERO);
        let comments = CommentFetcher::new("https://api.test/items");

        assert!(
            comments
                .fetch(&fetcher, "https://news.ycombinator.com/item?id=9")
                .await
                .is_err()
        );
    }
}
