//! Error taxonomy for the acquisition pipeline.
//!
//! Each component owns one error enum. The orchestrator catches everything
//! article- or source-scoped and turns it into a status update plus a log
//! line; only [`StoreError`] is allowed to abort a run.
//!
//! | Error | Scope | Recovery |
//! |-------|-------|----------|
//! | [`CrawlerError`] | source | next run |
//! | [`FetchError`] | article | next run |
//! | [`ExtractionError`] | article | next run, if the document changes |
//! | [`ServiceError`] | batch | next run; never marks articles failed |
//! | [`StoreError`] | run | fatal |

use std::time::Duration;
use thiserror::Error;

/// The crawler process could not produce a usable candidate list.
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("crawler command is empty")]
    EmptyCommand,
    #[error("failed to spawn crawler `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("crawler timed out after {0:?}")]
    Timeout(Duration),
    #[error("crawler exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },
    #[error("crawler produced no output")]
    EmptyOutput,
    #[error("crawler output is not a list of article records: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("crawler i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Network-level failure while retrieving a document.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("document exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("invalid proxy endpoint `{0}`")]
    InvalidProxy(String),
    #[error("direct attempt failed ({direct}); proxied attempt failed ({proxied})")]
    Exhausted {
        direct: Box<FetchError>,
        proxied: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether a failed direct attempt is worth repeating through the proxy.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) | FetchError::Transport(_) => true,
            FetchError::Status(code) => *code == 403 || *code == 429 || *code >= 500,
            FetchError::TooLarge { .. } | FetchError::InvalidProxy(_) | FetchError::Exhausted { .. } => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// The document could not be turned into readable text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document is empty")]
    Empty,
    #[error("unsupported content type `{0}`")]
    Unsupported(String),
    #[error("document is corrupt: {0}")]
    Corrupt(String),
}

/// Summarization or publishing collaborator failed.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("summarizer failed: {0}")]
    Summarizer(String),
    #[error("publisher failed: {0}")]
    Publisher(String),
    #[error("service i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The article store is unavailable or was asked to do something illegal.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("unknown article status `{0}`")]
    UnknownStatus(String),
    #[error("article {id} cannot move from {from} to {to}")]
    InvalidTransition { id: i64, from: String, to: String },
    #[error("article {0} not found")]
    MissingArticle(i64),
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// The daemon could not take or keep its single-instance lock.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("another instance is running (pid {pid}); stop it or remove {path}")]
    AlreadyRunning { pid: u32, path: String },
    #[error("pid file i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Any failure that sinks a single article.
#[derive(Debug, Error)]
pub enum ArticleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("cannot persist article text: {0}")]
    Persist(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Connect("refused".into()).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(FetchError::Status(403).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::TooLarge { limit: 10 }.is_retryable());
    }

    #[test]
    fn test_exhausted_message_mentions_both_attempts() {
        let e = FetchError::Exhausted {
            direct: Box::new(FetchError::Timeout),
            proxied: Box::new(FetchError::Status(502)),
        };
        let msg = e.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("502"));
    }
}
