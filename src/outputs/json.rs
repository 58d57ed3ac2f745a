//! JSON digest publisher.
//!
//! Each source's daily digest is written as a standalone JSON document:
//! ```text
//! digest_dir/
//! └── 2025-05-06/
//!     ├── Hacker_News.json
//!     └── QbitAI.json
//! ```
//!
//! Writes go to a temporary sibling and are renamed into place, so a reader
//! sees either the previous digest or the complete new one.

use super::{Publish, PublishReceipt};
use crate::error::ServiceError;
use crate::models::Digest;
use crate::utils::{sanitize_filename, write_atomic};
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

#[derive(Debug, Clone)]
pub struct JsonDigestPublisher {
    digest_dir: PathBuf,
}

impl JsonDigestPublisher {
    pub fn new(digest_dir: impl Into<PathBuf>) -> Self {
        Self {
            digest_dir: digest_dir.into(),
        }
    }

    /// Where the digest for `source` on `local_date` lands.
    pub fn path_for(&self, source: &str, local_date: &str) -> PathBuf {
        self.digest_dir
            .join(local_date)
            .join(format!("{}.json", sanitize_filename(source)))
    }
}

impl Publish for JsonDigestPublisher {
    /// Write a [`Digest`] to `{digest_dir}/{local_date}/{source}.json`.
    ///
    /// # Returns
    ///
    /// A receipt naming the written file, or [`ServiceError`] if the
    /// directory or the file cannot be written. Nothing is left half-written.
    #[instrument(level = "info", skip_all, fields(source = %digest.source, date = %digest.local_date))]
    async fn publish(&self, digest: &Digest) -> Result<PublishReceipt, ServiceError> {
        let json = serde_json::to_vec_pretty(digest)
            .map_err(|e| ServiceError::Publisher(format!("cannot serialize digest: {e}")))?;

        let path = self.path_for(&digest.source, &digest.local_date);
        if let Some(dir) = path.parent() {
            info!(dir = %dir.display(), "Ensuring digest directory exists");
            if let Err(e) = fs::create_dir_all(dir).await {
                error!(dir = %dir.display(), error = %e, "Failed to create digest dir");
                return Err(e.into());
            }
        }

        write_atomic(&path, &json).await?;
        info!(path = %path.display(), entries = digest.entries.len(), "Wrote digest");

        Ok(PublishReceipt {
            location: path.display().to_string(),
            entries: digest.entries.len(),
        })
    }
}
