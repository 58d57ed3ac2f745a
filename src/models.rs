//! Data models for sources, articles, and the daily digest.
//!
//! - [`Source`]: a configured origin of articles and the command that crawls it
//! - [`CandidateArticle`]: one record as emitted by a crawler process
//! - [`Article`]: the persisted lifecycle record of a discovered article
//! - [`ArticleStatus`]: the lifecycle states and their legal transitions
//! - [`Digest`]: the per-source payload handed to the publisher

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A configured origin of articles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Source {
    /// Unique, human-facing name (also used for the on-disk directory).
    pub name: String,
    /// Command line that runs the crawler, relative to the script root.
    pub crawler_command: String,
    /// Inactive sources are skipped by every run.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Cover image handed to the publisher alongside the digest.
    #[serde(default)]
    pub media_path: Option<String>,
}

fn default_active() -> bool {
    true
}

/// A single article record as printed by a crawler.
///
/// The crawler contract requires `title`, `url` and `published_date`;
/// `comments_url` is optional. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CandidateArticle {
    pub title: String,
    pub url: String,
    pub published_date: String,
    #[serde(default)]
    pub comments_url: Option<String>,
}

impl CandidateArticle {
    /// Parse `published_date` as ISO-8601.
    ///
    /// Accepts RFC 3339 (`2025-01-01T00:00:00Z`, offsets) and naive
    /// timestamps, which are taken to be UTC.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        parse_published(&self.published_date)
    }
}

pub(crate) fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

/// Lifecycle of an article.
///
/// ```text
/// discovered -> fetched -> extracted -> summarized
///      \            \           \
///       +------------+-----------+--> failed --(retry)--> discovered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArticleStatus {
    Discovered,
    Fetched,
    Extracted,
    Summarized,
    Failed,
}

impl ArticleStatus {
    pub const ALL: [ArticleStatus; 5] = [
        ArticleStatus::Discovered,
        ArticleStatus::Fetched,
        ArticleStatus::Extracted,
        ArticleStatus::Summarized,
        ArticleStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Discovered => "discovered",
            ArticleStatus::Fetched => "fetched",
            ArticleStatus::Extracted => "extracted",
            ArticleStatus::Summarized => "summarized",
            ArticleStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }

    /// Extraction has completed; the dedup check never re-downloads these.
    pub fn is_completed(&self) -> bool {
        matches!(self, ArticleStatus::Extracted | ArticleStatus::Summarized)
    }

    /// Whether `self -> next` is a legal move.
    ///
    /// Forward moves go one step at a time. `failed` is reachable from any
    /// non-terminal state. Moving back to `discovered` is a retry and is only
    /// allowed for records that never completed extraction.
    pub fn can_transition_to(&self, next: ArticleStatus) -> bool {
        use ArticleStatus::*;
        match (self, next) {
            (Discovered, Fetched) | (Fetched, Extracted) | (Extracted, Summarized) => true,
            (Summarized, _) => false,
            (_, Failed) => true,
            (Discovered | Fetched | Failed, Discovered) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted article record.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub source_name: String,
    pub title: String,
    pub url: String,
    pub published_date: String,
    pub comments_url: Option<String>,
    /// Summary input written by the orchestrator.
    pub local_text_path: Option<String>,
    /// Summary written by the summarization stage.
    pub summary_path: Option<String>,
    pub status: ArticleStatus,
    /// Number of times processing was started for this record.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        parse_published(&self.published_date)
    }
}

/// One summarized article inside a [`Digest`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DigestEntry {
    pub title: String,
    pub url: String,
    pub published_date: String,
    pub summary: String,
    /// Summary of the discussion thread, when the article had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_summary: Option<String>,
}

/// Per-source payload for the publishing collaborator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Digest {
    pub source: String,
    /// `YYYY-MM-DD` of the run that produced this digest.
    pub local_date: String,
    pub cover_media: Option<String>,
    pub entries: Vec<DigestEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_candidate_deserialization_without_comments() {
        let json = r#"{"title":"A","url":"http://x/1","published_date":"2025-01-01T00:00:00Z"}"#;
        let c: CandidateArticle = serde_json::from_str(json).unwrap();
        assert_eq!(c.title, "A");
        assert_eq!(c.comments_url, None);
        assert_eq!(
            c.published_at(),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_candidate_missing_url_is_rejected() {
        let json = r#"{"title":"A","published_date":"2025-01-01"}"#;
        assert!(serde_json::from_str::<CandidateArticle>(json).is_err());
    }

    #[test]
    fn test_published_date_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_published("2025-03-04T05:06:07Z"), Some(expected));
        assert_eq!(parse_published("2025-03-04T13:06:07+08:00"), Some(expected));
        assert_eq!(parse_published("2025-03-04T05:06:07.000"), Some(expected));
        assert_eq!(parse_published("2025-03-04 05:06:07"), Some(expected));
        assert_eq!(
            parse_published("2025-03-04"),
            Some(Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_published("3 hours ago"), None);
    }

    #[test]
    fn test_status_round_trip_names() {
        for st in ArticleStatus::ALL {
            assert_eq!(ArticleStatus::parse(st.as_str()), Some(st));
        }
        assert_eq!(ArticleStatus::parse("archived"), None);
    }

    #[test]
    fn test_forward_transitions_are_single_step() {
        use ArticleStatus::*;
        assert!(Discovered.can_transition_to(Fetched));
        assert!(Fetched.can_transition_to(Extracted));
        assert!(Extracted.can_transition_to(Summarized));
        assert!(!Discovered.can_transition_to(Extracted));
        assert!(!Extracted.can_transition_to(Fetched));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        use ArticleStatus::*;
        for st in [Discovered, Fetched, Extracted] {
            assert!(st.can_transition_to(Failed), "{st} -> failed");
        }
        assert!(!Summarized.can_transition_to(Failed));
    }

    #[test]
    fn test_retry_only_before_completion() {
        use ArticleStatus::*;
        assert!(Failed.can_transition_to(Discovered));
        assert!(Fetched.can_transition_to(Discovered));
        assert!(!Extracted.can_transition_to(Discovered));
        assert!(!Summarized.can_transition_to(Discovered));
    }

    #[test]
    fn test_digest_serialization() {
        let digest = Digest {
            source: "Hacker News".to_string(),
            local_date: "2025-05-06".to_string(),
            cover_media: Some("./media/hn.jpg".to_string()),
            entries: vec![DigestEntry {
                title: "T".to_string(),
                url: "http://x/1".to_string(),
                published_date: "2025-05-06T00:00:00Z".to_string(),
                summary: "S".to_string(),
                comment_summary: None,
            }],
        };
        let json = serde_json::to_string(&digest).unwrap();
        assert!(json.contains("Hacker News"));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }
}
