//! Turning a candidate URL into summary-ready text.
//!
//! Every candidate article goes through the same stages, regardless of the
//! source that announced it:
//!
//! 1. **Fetching**: download the article URL, directly first and through the
//!    proxy on network failure
//! 2. **Extraction**: turn HTML, PDF or plain text into normalized prose
//! 3. **Comments**: optionally read the discussion thread
//! 4. **Governing**: cap the combined text to the summarization budget
//!
//! # Components
//!
//! | Stage | Module | Main type | Notes |
//! |-------|--------|-----------|-------|
//! | Fetching | [`fetcher`] | [`ContentFetcher`] | One proxy retry on timeouts, refused connections, 403/429/5xx |
//! | Extraction | [`extractor`] | [`extract`] | `scraper` for HTML, `pdf-extract` for PDF |
//! | Comments | [`comments`] | [`CommentFetcher`] | Hacker News items API, other pages extracted as documents |
//! | Governing | [`governor`] | [`LengthGovernor`] | Single character budget shared by article and comments |
//!
//! Failures are per article: the caller records them and moves on.

pub mod comments;
pub mod extractor;
pub mod fetcher;
pub mod governor;

pub use comments::CommentFetcher;
pub use extractor::extract;
pub use fetcher::{ContentFetcher, FetchOptions, HttpTransport, Transport};
pub use governor::{LengthGovernor, COMMENTS_SEPARATOR};
