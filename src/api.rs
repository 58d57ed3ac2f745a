//! LLM-backed summarization with exponential backoff retry logic.
//!
//! Summarization is a black box to the pipeline: text and a role go in, a
//! short summary comes out, or a single [`ServiceError`] kind. The caller has
//! already enforced the input length budget; this module enforces the output
//! ceiling (250 characters for articles, 200 for comment threads by default).
//!
//! # Architecture
//!
//! - [`Summarize`]: the capability the pipeline depends on
//! - [`AskAsync`]: core trait defining async LLM interaction
//! - [`AskFnWrapper`]: wraps the `awful_aj` library's `ask` function
//! - [`RetryAsk`]: decorator that adds retry logic to any `AskAsync` implementation
//! - [`AwfulSummarizer`]: the production [`Summarize`], one chat template per role
//!
//! # Retry Strategy
//!
//! - Maximum 5 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use crate::config::SummarizerConfig;
use crate::error::ServiceError;
use awful_aj::api::ask;
use awful_aj::{config, config::AwfulJadeConfig, config_dir, template, template::ChatTemplate};
use rand::{rng, Rng};
use std::error::Error;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// What a piece of text is, which selects the prompt and the output ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryRole {
    Article,
    Comments,
}

/// Output ceilings, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryLimits {
    pub article_chars: usize,
    pub comment_chars: usize,
}

impl SummaryLimits {
    pub fn for_role(&self, role: SummaryRole) -> usize {
        match role {
            SummaryRole::Article => self.article_chars,
            SummaryRole::Comments => self.comment_chars,
        }
    }
}

/// Text-in, summary-out service.
pub trait Summarize {
    async fn summarize(&self, text: &str, role: SummaryRole) -> Result<String, ServiceError>;
}

/// Trait for async LLM interaction.
///
/// Implementors of this trait can send text to an LLM and receive a response.
/// This abstraction allows for different LLM backends or decorators (like retry logic).
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    /// Send text to the LLM and receive a response.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Create a new retry wrapper around an existing [`AskAsync`] implementation.
    ///
    /// # Arguments
    ///
    /// * `inner` - The underlying LLM client to wrap
    /// * `max_retries` - Maximum number of retry attempts (5 recommended)
    /// * `base_delay` - Initial delay between retries (1 second recommended)
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Wrapper around `awful_aj::api::ask` that implements [`AskAsync`].
#[derive(Debug)]
pub struct AskFnWrapper<'a> {
    /// LLM configuration (API keys, endpoints, model settings).
    pub config: &'a AwfulJadeConfig,
    /// Chat template defining the conversation structure.
    pub template: &'a ChatTemplate,
}

impl AskAsync for AskFnWrapper<'_> {
    type Response = String;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let res = ask(self.config, text.to_string(), self.template, None, None, false).await;
        if let Err(e) = &res {
            warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %e, "API call failed");
        }
        res
    }
}

/// [`Summarize`] over an OpenAI-compatible endpoint via `awful_aj`.
pub struct AwfulSummarizer {
    config: AwfulJadeConfig,
    article_template: ChatTemplate,
    comment_template: ChatTemplate,
    limits: SummaryLimits,
}

impl fmt::Debug for AwfulSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwfulSummarizer")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl AwfulSummarizer {
    /// Load the client configuration and both chat templates.
    ///
    /// The client configuration comes from `settings.config_path`, or from
    /// `config.yaml` in the client's own config directory.
    #[instrument(level = "info", skip_all)]
    pub async fn load(settings: &SummarizerConfig, limits: SummaryLimits) -> Result<Self, ServiceError> {
        let conf_file = match &settings.config_path {
            Some(path) => path.clone(),
            None => config_dir().map_err(as_service)?.join("config.yaml"),
        };
        let config_path = conf_file.to_str().ok_or_else(|| {
            ServiceError::Summarizer(format!("config path {} is not UTF-8", conf_file.display()))
        })?;
        let config = config::load_config(config_path).map_err(as_service)?;
        info!(config_path, "Loaded summarizer configuration");

        let article_template = template::load_template(&settings.article_template)
            .await
            .map_err(as_service)?;
        let comment_template = template::load_template(&settings.comment_template)
            .await
            .map_err(as_service)?;
        info!(
            article_template = %settings.article_template,
            comment_template = %settings.comment_template,
            "Loaded summary templates"
        );

        Ok(Self {
            config,
            article_template,
            comment_template,
            limits,
        })
    }
}

impl Summarize for AwfulSummarizer {
    #[instrument(level = "info", skip_all, fields(?role, input_chars = text.chars().count()))]
    async fn summarize(&self, text: &str, role: SummaryRole) -> Result<String, ServiceError> {
        let template = match role {
            SummaryRole::Article => &self.article_template,
            SummaryRole::Comments => &self.comment_template,
        };
        let client = AskFnWrapper {
            config: &self.config,
            template,
        };
        let api = RetryAsk::new(client, 5, StdDuration::from_secs(1));
        let raw = api
            .ask(text)
            .await
            .map_err(as_service)?;
        clip_summary(&raw, self.limits.for_role(role))
    }
}

fn as_service(e: impl fmt::Display) -> ServiceError {
    ServiceError::Summarizer(e.to_string())
}

/// Trim a model response and cut it to `max_chars` characters.
///
/// # Errors
///
/// An empty response is a [`ServiceError::Summarizer`]; there is no partial
/// output.
pub fn clip_summary(raw: &str, max_chars: usize) -> Result<String, ServiceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Summarizer("empty summary".to_string()));
    }
    Ok(match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].trim_end().to_string(),
        None => trimmed.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic summarizers for pipeline tests.

    use super::*;
    use std::cell::RefCell;

    /// Returns `"<role> summary of <n> chars"`, or fails every call.
    #[derive(Default)]
    pub struct FakeSummarizer {
        pub fail: bool,
        pub calls: RefCell<Vec<(SummaryRole, usize)>>,
    }

    impl FakeSummarizer {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    impl Summarize for FakeSummarizer {
        async fn summarize(&self, text: &str, role: SummaryRole) -> Result<String, ServiceError> {
            let chars = text.chars().count();
            self.calls.borrow_mut().push((role, chars));
            if self.fail {
                return Err(ServiceError::Summarizer("model unavailable".to_string()));
            }
            Ok(format!("{role:?} summary of {chars} chars"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Flaky {
        failures_left: Cell<usize>,
        calls: Cell<usize>,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: Cell::new(failures),
                calls: Cell::new(0),
            }
        }
    }

    impl AskAsync for Flaky {
        type Response = String;

        async fn ask(&self, text: &str) -> Result<String, Box<dyn Error>> {
            self.calls.set(self.calls.get() + 1);
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err("503 Service Unavailable".into());
            }
            Ok(format!("echo: {text}"))
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let api = RetryAsk::new(Flaky::new(2), 5, StdDuration::ZERO);
        let resp = api.ask("hello").await.unwrap();
        assert_eq!(resp, "echo: hello");
        assert_eq!(api.inner.calls.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let api = RetryAsk::new(Flaky::new(10), 2, StdDuration::ZERO);
        assert!(api.ask("hello").await.is_err());
        assert_eq!(api.inner.calls.get(), 3);
    }

    #[test]
    fn test_backoff_is_capped() {
        let api = RetryAsk::new(Flaky::new(0), 5, StdDuration::from_secs(1));
        let first = api.backoff(1);
        assert!(first >= StdDuration::from_secs(1) && first <= StdDuration::from_millis(1_250));
        let late = api.backoff(10);
        assert!(late >= StdDuration::from_secs(30) && late <= StdDuration::from_millis(30_250));
    }

    #[test]
    fn test_clip_summary_to_role_ceiling() {
        let limits = SummaryLimits {
            article_chars: 250,
            comment_chars: 200,
        };
        let long = "s".repeat(400);
        assert_eq!(
            clip_summary(&long, limits.for_role(SummaryRole::Article)).unwrap().chars().count(),
            250
        );
        assert_eq!(
            clip_summary(&long, limits.for_role(SummaryRole::Comments)).unwrap().chars().count(),
            200
        );
        assert_eq!(clip_summary("  short  ", 250).unwrap(), "short");
    }

    #[test]
    fn test_clip_summary_counts_characters() {
        assert_eq!(clip_summary("摘要内容很长", 2).unwrap(), "摘要");
    }

    #[test]
    fn test_empty_summary_is_an_error() {
        assert!(matches!(
            clip_summary(" \n ", 250),
            Err(ServiceError::Summarizer(_))
        ));
    }
}
