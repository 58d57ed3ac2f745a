//! Converts fetched documents into normalized plain text.
//!
//! HTML is walked with `scraper`, dropping boilerplate subtrees (navigation,
//! scripts, forms, ...) and turning block elements into paragraph breaks.
//! When the page has an `<article>` or `<main>` with real content, only that
//! subtree is read. HTML and plain text are decoded with the charset the
//! server declared, or the page's `<meta>` charset, defaulting to UTF-8.
//! PDFs go through `pdf-extract`. Every result is
//! normalized the same way: trimmed lines, at most one blank line in a row,
//! single spaces inside lines.

use super::fetcher::{ContentKind, Document};
use crate::error::ExtractionError;
use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, instrument, warn};

static INLINE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static ANY_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static CHARSET_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)charset\s*=\s*["']?([A-Za-z0-9._:-]+)"#).unwrap());
static META_CHARSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([A-Za-z0-9._:-]+)"#).unwrap());

/// How far into an HTML body to look for a `<meta>` charset.
const META_SNIFF_BYTES: usize = 1024;

/// Subtrees that never hold article prose.
const SKIPPED: &[&str] = &[
    "head", "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "svg",
    "iframe", "template", "button", "select", "canvas",
];

/// Elements that start and end a paragraph.
const BLOCKS: &[&str] = &[
    "p", "div", "section", "article", "main", "blockquote", "pre", "ul", "ol", "li", "table",
    "tr", "h1", "h2", "h3", "h4", "h5", "h6", "figure", "figcaption", "dl", "dt", "dd", "hr",
];

/// Content roots preferred over `<body>`, in priority order.
const CONTENT_ROOTS: &[&str] = &["article", "main", "[role=main]"];

/// Minimum text a content root must carry to be trusted over `<body>`.
const MIN_ROOT_CHARS: usize = 200;

/// Produce normalized plain text for a fetched document.
///
/// # Errors
///
/// - [`ExtractionError::Unsupported`] for content that is neither HTML,
///   PDF nor text
/// - [`ExtractionError::Corrupt`] when the PDF parser rejects the bytes
/// - [`ExtractionError::Empty`] when nothing readable remains
#[instrument(level = "info", skip_all, fields(url = %doc.url, kind = ?doc.kind))]
pub fn extract(doc: &Document) -> Result<String, ExtractionError> {
    if doc.bytes.is_empty() {
        return Err(ExtractionError::Empty);
    }
    let text = match doc.kind {
        ContentKind::Html => html_to_text(&decode(doc)),
        ContentKind::Pdf => pdf_to_text(&doc.bytes)?,
        ContentKind::PlainText => normalize(&decode(doc)),
        ContentKind::Unknown => {
            return Err(ExtractionError::Unsupported(doc.content_type.clone()));
        }
    };
    if text.is_empty() {
        warn!("Document produced no readable text");
        return Err(ExtractionError::Empty);
    }
    debug!(chars = text.chars().count(), "Extracted text");
    Ok(text)
}

/// Decode a text body: `Content-Type` charset, then `<meta>` charset, then
/// UTF-8. A byte-order mark wins over both.
fn decode(doc: &Document) -> String {
    let declared = CHARSET_PARAM
        .captures(&doc.content_type)
        .and_then(|c| Encoding::for_label(c[1].as_bytes()));
    let encoding = declared
        .or_else(|| {
            if doc.kind != ContentKind::Html {
                return None;
            }
            let head = &doc.bytes[..doc.bytes.len().min(META_SNIFF_BYTES)];
            META_CHARSET
                .captures(&String::from_utf8_lossy(head))
                .and_then(|c| Encoding::for_label(c[1].as_bytes()))
        })
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(&doc.bytes);
    if had_errors {
        warn!(encoding = used.name(), "Body had bytes invalid for its encoding");
    } else {
        debug!(encoding = used.name(), "Decoded body");
    }
    text.into_owned()
}

/// Strip markup and boilerplate from an HTML document or fragment.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = content_root(&document).unwrap_or_else(|| document.root_element());
    let mut out = String::new();
    walk(root, &mut out);
    normalize(&out)
}

fn content_root(document: &Html) -> Option<ElementRef<'_>> {
    for css in CONTENT_ROOTS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        let found = document.select(&selector).find(|el| {
            let mut text = String::new();
            walk(*el, &mut text);
            text.split_whitespace().map(str::len).sum::<usize>() >= MIN_ROOT_CHARS
        });
        if found.is_some() {
            return found;
        }
    }
    let body = Selector::parse("body").ok()?;
    document.select(&body).next()
}

/// Collect the text below `element`. Iterative, so nesting depth is bounded
/// by the heap rather than the call stack.
fn walk(element: ElementRef<'_>, out: &mut String) {
    // Children still to visit, and whether their parent is a block element.
    let mut stack = vec![(element.children(), false)];
    while let Some((children, _)) = stack.last_mut() {
        let Some(child) = children.next() else {
            if let Some((_, true)) = stack.pop() {
                out.push_str("\n\n");
            }
            continue;
        };
        match child.value() {
            Node::Text(text) => {
                out.push_str(&ANY_WS.replace_all(text, " "));
            }
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED.contains(&name) {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let block = BLOCKS.contains(&name);
                if block {
                    out.push_str("\n\n");
                }
                stack.push((child.children(), block));
            }
            _ => {}
        }
    }
}

/// Extract all pages of a PDF and concatenate them.
fn pdf_to_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    // The PDF parser panics on some malformed inputs.
    let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| ExtractionError::Corrupt("PDF parser panicked".to_string()))?
        .map_err(|e| ExtractionError::Corrupt(e.to_string()))?;

    let joined = extracted
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Ok(normalize(&joined))
}

/// Normalize whitespace: single spaces inside lines, trimmed lines, and
/// never more than one blank line between paragraphs.
pub fn normalize(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let spaced = INLINE_WS.replace_all(&text, " ");
    let trimmed_lines = spaced.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    BLANK_RUNS
        .replace_all(&trimmed_lines, "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(kind: ContentKind, content_type: &str, body: &[u8]) -> Document {
        Document {
            url: "http://x/1".to_string(),
            kind,
            content_type: content_type.to_string(),
            bytes: body.to_vec(),
        }
    }

    #[test]
    fn test_html_boilerplate_is_removed() {
        let html = r#"<!doctype html><html><head><title>T</title>
            <style>body { color: red }</style></head>
            <body>
              <nav><a href="/">Home</a> | <a href="/about">About</a></nav>
              <h1>Headline</h1>
              <p>First   paragraph
                 spans lines.</p>
              <script>var tracking = 1;</script>
              <p>Second <b>bold</b> paragraph.</p>
              <footer>Copyright</footer>
            </body></html>"#;
        let text = html_to_text(html);
        assert_eq!(
            text,
            "Headline\n\nFirst paragraph spans lines.\n\nSecond bold paragraph."
        );
    }

    #[test]
    fn test_article_root_is_preferred() {
        let body = "word ".repeat(60);
        let html = format!(
            "<html><body><div class=sidebar>Trending now</div>\
             <article><p>{body}</p></article></body></html>"
        );
        let text = html_to_text(&html);
        assert!(!text.contains("Trending"));
        assert!(text.starts_with("word word"));
    }

    #[test]
    fn test_short_article_root_falls_back_to_body() {
        let html = "<html><body><article>tiny</article><p>Real body text.</p></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("tiny"));
        assert!(text.contains("Real body text."));
    }

    #[test]
    fn test_line_breaks_are_kept() {
        let text = html_to_text("<p>one<br>two</p>");
        assert_eq!(text, "one\ntwo");
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        let raw = "  a \t b  \r\n\n\n\n c  \n";
        assert_eq!(normalize(raw), "a b\n\nc");
    }

    #[test]
    fn test_plain_text_is_normalized() {
        let d = doc(ContentKind::PlainText, "text/plain", b"hello\n\n\n\nworld  ");
        assert_eq!(extract(&d).unwrap(), "hello\n\nworld");
    }

    #[test]
    fn test_empty_documents_fail() {
        let d = doc(ContentKind::Html, "text/html", b"");
        assert!(matches!(extract(&d), Err(ExtractionError::Empty)));

        let d = doc(ContentKind::Html, "text/html", b"<html><body><script>x()</script></body></html>");
        assert!(matches!(extract(&d), Err(ExtractionError::Empty)));
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let d = doc(ContentKind::Unknown, "image/png", &[0x89, 0x50, 0x4e, 0x47]);
        match extract(&d) {
            Err(ExtractionError::Unsupported(ct)) => assert_eq!(ct, "image/png"),
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }

    #[test]
    fn test_declared_charset_is_honoured() {
        let (gbk, _, _) = encoding_rs::GBK.encode("<html><body><p>中文新闻</p></body></html>");
        let d = doc(ContentKind::Html, "text/html; charset=gbk", &gbk);
        assert_eq!(extract(&d).unwrap(), "中文新闻");

        let (plain, _, _) = encoding_rs::GBK.encode("量子位 报道");
        let d = doc(ContentKind::PlainText, "text/plain; charset=GB2312", &plain);
        assert_eq!(extract(&d).unwrap(), "量子位 报道");
    }

    #[test]
    fn test_meta_charset_is_used_without_header_charset() {
        let (gbk, _, _) = encoding_rs::GBK.encode(
            r#"<html><head><meta http-equiv="Content-Type" content="text/html; charset=gbk"></head><body><p>大模型</p></body></html>"#,
        );
        let d = doc(ContentKind::Html, "text/html", &gbk);
        assert_eq!(extract(&d).unwrap(), "大模型");
    }

    #[test]
    fn test_utf8_is_the_default() {
        let d = doc(ContentKind::Html, "text/html", "<p>naïve café</p>".as_bytes());
        assert_eq!(extract(&d).unwrap(), "naïve café");
    }

    #[test]
    fn test_deeply_nested_markup_does_not_exhaust_the_stack() {
        let depth = 20_000;
        let html = format!("{}deep text{}", "<div>".repeat(depth), "</div>".repeat(depth));
        assert_eq!(html_to_text(&html), "deep text");
    }

    #[test]
    fn test_corrupt_pdf_fails() {
        let d = doc(ContentKind::Pdf, "application/pdf", b"%PDF-1.4 this is not a pdf");
        assert!(matches!(extract(&d), Err(ExtractionError::Corrupt(_))));
    }
}
