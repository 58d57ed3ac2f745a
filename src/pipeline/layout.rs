//! Where per-article artifacts live on disk.
//!
//! ```text
//! data_dir/
//! └── Hacker_News/
//!     └── 20250506/
//!         ├── 1746493200_42_Show_HN：_A_tiny_VM.txt          # summary input
//!         └── 1746493200_42_Show_HN：_A_tiny_VM.summary.txt  # summary
//! scratch_dir/
//! └── 1746500400_Show_HN：_A_tiny_VM_raw.txt             # debug dump
//! ```
//!
//! Date directory and timestamp prefix come from the article's
//! `published_date`, falling back to the time the path is computed. The
//! article id keeps two articles with equal timestamps and titles apart.

use crate::models::Article;
use crate::utils::{date_stamp, sanitize_filename, source_dir_name};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    data_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new(data_dir: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// `<data_dir>/<source>/<YYYYMMDD>/<unix_ts>_<id>_<title>.txt`
    pub fn summary_input_path(&self, article: &Article) -> PathBuf {
        let published = article.published_at().unwrap_or_else(Utc::now);
        self.data_dir
            .join(source_dir_name(&article.source_name))
            .join(date_stamp(&published))
            .join(format!(
                "{}_{}_{}.txt",
                published.timestamp(),
                article.id,
                sanitize_filename(&article.title)
            ))
    }

    /// Raw extracted text, uncapped, for `--debug` runs.
    pub fn debug_dump_path(&self, article: &Article, now: DateTime<Utc>) -> PathBuf {
        self.scratch_dir.join(format!(
            "{}_{}_raw.txt",
            now.timestamp(),
            sanitize_filename(&article.title)
        ))
    }
}

/// The summary sitting next to a summary input file.
pub fn summary_output_path(input: &Path) -> PathBuf {
    input.with_extension("summary.txt")
}
