//! Hard ceiling on the text handed to summarization.
//!
//! One budget covers the whole per-article payload: the article text is cut
//! to the budget first, and the comments get whatever is left after the
//! article and the separator line between them. Cuts are made on character
//! boundaries from the tail, with no attempt at finding sentence ends.

use tracing::info;

/// Line written between article text and comments in a summary input file.
pub const COMMENTS_SEPARATOR: &str = "\n\n===== COMMENTS =====\n\n";

/// Which part of the payload is being capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextRole {
    Article,
    /// Comments share the budget with an article of `article_chars` characters.
    Comments { article_chars: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct LengthGovernor {
    max_chars: usize,
}

impl LengthGovernor {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Characters available to `role`.
    pub fn budget(&self, role: TextRole) -> usize {
        match role {
            TextRole::Article => self.max_chars,
            TextRole::Comments { article_chars } => self
                .max_chars
                .saturating_sub(article_chars)
                .saturating_sub(COMMENTS_SEPARATOR.chars().count()),
        }
    }

    /// Truncate `text` to the budget of `role`. Never fails.
    pub fn cap(&self, mut text: String, role: TextRole) -> String {
        let budget = self.budget(role);
        if let Some((cut, _)) = text.char_indices().nth(budget) {
            let original = text.chars().count();
            text.truncate(cut);
            info!(?role, original_chars = original, kept_chars = budget, "Truncated text to budget");
        }
        text
    }

    /// Join capped article text and optional comments into one payload.
    ///
    /// Comments that end up with no budget are dropped entirely, separator
    /// included.
    pub fn compose(&self, article: String, comments: Option<String>) -> String {
        let article = self.cap(article, TextRole::Article);
        let article_chars = article.chars().count();
        match comments {
            Some(c) => {
                let c = self.cap(c, TextRole::Comments { article_chars });
                if c.is_empty() {
                    article
                } else {
                    format!("{article}{COMMENTS_SEPARATOR}{c}")
                }
            }
            None => article,
        }
    }
}

/// Split a payload written by [`LengthGovernor::compose`] back into article
/// text and comments.
pub fn split_payload(payload: &str) -> (&str, Option<&str>) {
    match payload.split_once(COMMENTS_SEPARATOR) {
        Some((article, comments)) => (article, Some(comments)),
        None => (payload, None),
    }
}
