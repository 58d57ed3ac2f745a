//! Document retrieval with direct-then-proxy fallback.
//!
//! A [`ContentFetcher`] owns two [`Transport`]s: one that goes straight to
//! the origin and an optional one routed through a local proxy. A failed
//! direct attempt is repeated exactly once through the proxy, after a short
//! pause, when the failure looks like a network problem (timeouts, refused
//! connections, TLS errors, 403/429/5xx). Anything else fails immediately.
//!
//! Raw bytes are never cached; each article is fetched independently.

use crate::error::FetchError;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// What kind of document the body holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Pdf,
    PlainText,
    Unknown,
}

impl ContentKind {
    /// Classify a body from its declared `Content-Type`, sniffing the
    /// bytes when the header is missing or unhelpful.
    pub fn detect(content_type: Option<&str>, body: &[u8]) -> Self {
        let ct = content_type.unwrap_or_default().to_ascii_lowercase();
        if ct.contains("application/pdf") || body.starts_with(b"%PDF-") {
            ContentKind::Pdf
        } else if ct.contains("html") || ct.contains("xml") || looks_like_html(body) {
            ContentKind::Html
        } else if ct.starts_with("text/") || (ct.is_empty() && std::str::from_utf8(body).is_ok()) {
            ContentKind::PlainText
        } else {
            ContentKind::Unknown
        }
    }
}

fn looks_like_html(body: &[u8]) -> bool {
    let head = &body[..body.len().min(512)];
    let head = String::from_utf8_lossy(head).trim_start().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// A fetched document, ready for extraction.
#[derive(Clone)]
pub struct Document {
    pub url: String,
    pub kind: ContentKind,
    /// Declared `Content-Type`, kept for diagnostics.
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("url", &self.url)
            .field("kind", &self.kind)
            .field("content_type", &self.content_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// A successful (2xx) HTTP response body.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// One way of issuing a GET request.
///
/// Implementations must map non-2xx statuses to [`FetchError::Status`].
pub trait Transport {
    async fn get(&self, url: &str) -> Result<RawResponse, FetchError>;
}

/// Knobs shared by the direct and proxied HTTP transports.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Bodies larger than this are rejected while streaming.
    pub max_bytes: usize,
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    max_bytes: usize,
    route: &'static str,
}

impl HttpTransport {
    /// A transport that connects to origins directly (system proxies ignored).
    pub fn direct(opts: &FetchOptions) -> Result<Self, FetchError> {
        let client = Self::builder(opts).no_proxy().build()?;
        Ok(Self {
            client,
            max_bytes: opts.max_bytes,
            route: "direct",
        })
    }

    /// A transport that routes every request through `proxy_url`.
    pub fn proxied(opts: &FetchOptions, proxy_url: &str) -> Result<Self, FetchError> {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|_| FetchError::InvalidProxy(proxy_url.to_string()))?;
        let client = Self::builder(opts).proxy(proxy).build()?;
        Ok(Self {
            client,
            max_bytes: opts.max_bytes,
            route: "proxy",
        })
    }

    fn builder(opts: &FetchOptions) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .user_agent(&opts.user_agent)
            .timeout(opts.timeout)
            .connect_timeout(opts.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
    }
}

impl Transport for HttpTransport {
    #[instrument(level = "debug", skip_all, fields(%url, route = self.route))]
    async fn get(&self, url: &str) -> Result<RawResponse, FetchError> {
        let mut response = self
            .client
            .get(url)
            .header(ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7")
            .header(REFERER, url)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        if response
            .content_length()
            .is_some_and(|len| len as usize > self.max_bytes)
        {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }
        debug!(bytes = body.len(), ?content_type, "Response body read");
        Ok(RawResponse { content_type, body })
    }
}

/// Fetches documents, falling back to a proxy once when the direct route fails.
#[derive(Debug)]
pub struct ContentFetcher<T> {
    direct: T,
    proxy: Option<T>,
    retry_delay: Duration,
}

impl<T: Transport> ContentFetcher<T> {
    pub fn new(direct: T, proxy: Option<T>, retry_delay: Duration) -> Self {
        Self {
            direct,
            proxy,
            retry_delay,
        }
    }

    /// Fetch `url` and classify its body.
    ///
    /// # Errors
    ///
    /// - the direct error, when it is not retryable or no proxy is configured
    /// - [`FetchError::Exhausted`] when both routes failed
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &str) -> Result<Document, FetchError> {
        let raw = self.get_raw(url).await?;
        let kind = ContentKind::detect(raw.content_type.as_deref(), &raw.body);
        info!(?kind, bytes = raw.body.len(), "Fetched document");
        Ok(Document {
            url: url.to_string(),
            kind,
            content_type: raw.content_type.unwrap_or_default(),
            bytes: raw.body,
        })
    }

    /// Like [`fetch`](Self::fetch), but returns the bare body. Used for
    /// structured API calls that do not go through extraction.
    pub async fn get_raw(&self, url: &str) -> Result<RawResponse, FetchError> {
        let t0 = Instant::now();
        let direct_err = match self.direct.get(url).await {
            Ok(raw) => return Ok(raw),
            Err(e) => e,
        };

        let proxy = match &self.proxy {
            Some(proxy) if direct_err.is_retryable() => proxy,
            _ => {
                warn!(%url, error = %direct_err, "Direct fetch failed; no proxy retry");
                return Err(direct_err);
            }
        };

        warn!(
            %url,
            error = %direct_err,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            delay = ?self.retry_delay,
            "Direct fetch failed; retrying through proxy"
        );
        sleep(self.retry_delay).await;

        match proxy.get(url).await {
            Ok(raw) => {
                info!(%url, elapsed_ms = t0.elapsed().as_millis() as u64, "Fetched through proxy");
                Ok(raw)
            }
            Err(proxied) => Err(FetchError::Exhausted {
                direct: Box::new(direct_err),
                proxied: Box::new(proxied),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transports shared by the pipeline tests.

    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Serves canned responses keyed by URL and records every request.
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub routes: HashMap<String, Result<RawResponse, u16>>,
        pub fail_all_with: Option<fn() -> FetchError>,
        pub calls: RefCell<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn html(mut self, url: &str, body: &str) -> Self {
            self.routes.insert(
                url.to_string(),
                Ok(RawResponse {
                    content_type: Some("text/html; charset=utf-8".to_string()),
                    body: body.as_bytes().to_vec(),
                }),
            );
            self
        }

        pub fn json(mut self, url: &str, body: &str) -> Self {
            self.routes.insert(
                url.to_string(),
                Ok(RawResponse {
                    content_type: Some("application/json".to_string()),
                    body: body.as_bytes().to_vec(),
                }),
            );
            self
        }

        pub fn bytes(mut self, url: &str, content_type: &str, body: &[u8]) -> Self {
            self.routes.insert(
                url.to_string(),
                Ok(RawResponse {
                    content_type: Some(content_type.to_string()),
                    body: body.to_vec(),
                }),
            );
            self
        }

        pub fn status(mut self, url: &str, code: u16) -> Self {
            self.routes.insert(url.to_string(), Err(code));
            self
        }

        pub fn unreachable() -> Self {
            Self {
                fail_all_with: Some(|| FetchError::Timeout),
                ..Self::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<RawResponse, FetchError> {
            self.calls.borrow_mut().push(url.to_string());
            if let Some(fail) = self.fail_all_with {
                return Err(fail());
            }
            match self.routes.get(url) {
                Some(Ok(raw)) => Ok(raw.clone()),
                Some(Err(code)) => Err(FetchError::Status(*code)),
                None => Err(FetchError::Status(404)),
            }
        }
    }
}
