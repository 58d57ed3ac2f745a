//! Application configuration loaded from `config.yaml`.
//!
//! Every key has a default, so an empty (or missing) file yields a usable
//! configuration. Paths are interpreted relative to the working directory.
//!
//! ```yaml
//! database_path: digest.db
//! proxy_url: http://127.0.0.1:7890
//! daily_time: "05:00"
//! sources:
//!   - name: Hacker News
//!     crawler_command: python crawler_hackernews.py
//!     media_path: ./media/hacker_news.jpg
//! ```

use crate::acquire::comments::HN_ITEMS_API;
use crate::error::ConfigError;
use crate::models::Source;
use chrono::NaiveTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default combined character budget for one article's summary input.
pub const MAX_SUMMARY_TEXT_LENGTH: usize = 120_000;

/// Settings for the LLM-backed summarizer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Path to the LLM client configuration; defaults to the client's own
    /// config directory.
    pub config_path: Option<PathBuf>,
    /// Chat template used for article text.
    pub article_template: String,
    /// Chat template used for comment threads.
    pub comment_template: String,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            article_template: "article_summary".to_string(),
            comment_template: "comment_summary".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    /// Root of the per-source, per-date artifact tree.
    pub data_dir: PathBuf,
    /// Where debug dumps of raw extracted text go.
    pub scratch_dir: PathBuf,
    /// Where the JSON digest publisher writes.
    pub digest_dir: PathBuf,
    /// Working directory for crawler processes.
    pub script_root: PathBuf,
    pub proxy_url: Option<String>,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub max_document_bytes: usize,
    pub crawler_timeout_secs: u64,
    pub max_summary_text_length: usize,
    pub article_summary_chars: usize,
    pub comment_summary_chars: usize,
    /// Stop retrying an article after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Wall-clock `HH:MM` at which the daemon runs the daily batch.
    pub daily_time: String,
    pub pid_file: PathBuf,
    pub comments_api_base: String,
    pub summarizer: SummarizerConfig,
    /// Sources seeded into the registry at startup.
    pub sources: Vec<Source>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("digest.db"),
            data_dir: PathBuf::from("abstraction"),
            scratch_dir: PathBuf::from("temp"),
            digest_dir: PathBuf::from("digests"),
            script_root: PathBuf::from("src"),
            proxy_url: Some("http://127.0.0.1:7890".to_string()),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            fetch_timeout_secs: 30,
            connect_timeout_secs: 10,
            retry_delay_ms: 3_000,
            max_document_bytes: 20 * 1024 * 1024,
            crawler_timeout_secs: 600,
            max_summary_text_length: MAX_SUMMARY_TEXT_LENGTH,
            article_summary_chars: 250,
            comment_summary_chars: 200,
            max_attempts: None,
            daily_time: "05:00".to_string(),
            pid_file: PathBuf::from("digest_service.pid"),
            comments_api_base: HN_ITEMS_API.to_string(),
            summarizer: SummarizerConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an explicit path, or from `./config.yaml`
    /// when it exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from("config.yaml");
                if !default.exists() {
                    info!("No config.yaml found; using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&raw)?;
        info!(path = %path.display(), sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = if raw.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        debug!(?config, "Validated configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        parse_daily_time(&self.daily_time)?;
        let non_zero = [
            ("max_summary_text_length", self.max_summary_text_length),
            ("max_document_bytes", self.max_document_bytes),
            ("fetch_timeout_secs", self.fetch_timeout_secs as usize),
            ("crawler_timeout_secs", self.crawler_timeout_secs as usize),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid {
                key: "max_attempts",
                reason: "must be greater than zero when set".to_string(),
            });
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn crawler_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler_timeout_secs)
    }
}

/// Parse an `HH:MM` wall-clock time.
pub fn parse_daily_time(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| ConfigError::Invalid {
        key: "daily_time",
        reason: format!("`{raw}` is not HH:MM ({e})"),
    })
}
