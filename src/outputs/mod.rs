//! Digest publishing.
//!
//! Publishing is the last step of a run and sits outside the article
//! lifecycle: a failed publish only means that day's digest did not go out.
//! Articles already marked `summarized` stay that way.
//!
//! # Submodules
//!
//! - [`json`]: writes each source's [`Digest`] to a dated JSON file
//!
//! # Output Structure
//!
//! ```text
//! digest_dir/
//! └── 2025-05-06/
//!     └── Hacker_News.json
//! ```

use crate::error::ServiceError;
use crate::models::Digest;

pub mod json;

/// Confirmation returned by a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Where the digest went (a path, a URL, a message id).
    pub location: String,
    pub entries: usize,
}

/// Submits a rendered digest. Either the whole digest is published or
/// nothing is.
pub trait Publish {
    async fn publish(&self, digest: &Digest) -> Result<PublishReceipt, ServiceError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    /// Records digests, optionally refusing all of them.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub fail: bool,
        pub published: RefCell<Vec<Digest>>,
    }

    impl Publish for RecordingPublisher {
        async fn publish(&self, digest: &Digest) -> Result<PublishReceipt, ServiceError> {
            if self.fail {
                return Err(ServiceError::Publisher("upstream rejected the report".to_string()));
            }
            self.published.borrow_mut().push(digest.clone());
            Ok(PublishReceipt {
                location: format!("memory://{}", digest.source),
                entries: digest.entries.len(),
            })
        }
    }
}
