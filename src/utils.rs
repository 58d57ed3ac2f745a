//! Utility functions for filenames, date stamps, logging, and the file system.
//!
//! This module provides helper functions used throughout the application:
//! - Filename sanitization for the per-source artifact tree
//! - Date stamps used as directory names
//! - String truncation for log previews
//! - File system validation and atomic writes for output directories

use chrono::{DateTime, Utc};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Longest sanitized title kept in a filename (before timestamp and extension).
const MAX_FILENAME_TITLE: usize = 100;

/// Byte ceiling for the sanitized title. Leaves room for the timestamp and id
/// prefix plus `.summary.txt.partial` under the 255-byte filename limit.
const MAX_FILENAME_TITLE_BYTES: usize = 180;

/// Make an article title safe to use as a filename.
///
/// Filesystem-unsafe characters are replaced by their full-width
/// look-alikes so the title stays readable; whitespace and control
/// characters become `_`, runs of `_` collapse. Titles longer than 100
/// characters or 180 bytes are cut on a character boundary and end in `...`,
/// so wide (CJK) titles stay within filesystem name limits.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(sanitize_filename("a/b: c?"), "a／b：_c？");
/// ```
pub fn sanitize_filename(title: &str) -> String {
    let mapped: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' => '／',
            '\\' => '＼',
            ':' => '：',
            '*' => '＊',
            '?' => '？',
            '"' => '＂',
            '<' => '＜',
            '>' => '＞',
            '|' => '｜',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect();

    let mut collapsed = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }

    if collapsed.chars().count() <= MAX_FILENAME_TITLE && collapsed.len() <= MAX_FILENAME_TITLE_BYTES {
        return collapsed;
    }
    let mut end = 0;
    for (n, (idx, c)) in collapsed.char_indices().enumerate() {
        let next = idx + c.len_utf8();
        if n == MAX_FILENAME_TITLE - 3 || next > MAX_FILENAME_TITLE_BYTES - 3 {
            break;
        }
        end = next;
    }
    format!("{}...", &collapsed[..end])
}

/// Directory-safe form of a source name (spaces become underscores).
pub fn source_dir_name(source: &str) -> String {
    source.trim().replace(' ', "_")
}

/// 8-digit `YYYYMMDD` stamp used for the per-date artifact directories.
pub fn date_stamp(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%d").to_string()
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to at most `max` bytes (backing off to a
/// character boundary) with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Directory is writable");
    Ok(())
}

/// Write `contents` to `path` so readers never observe a partial file.
///
/// Parent directories are created as needed; the data is written to a
/// sibling temporary file and renamed into place.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".partial");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        let s = "éééé";
        // 'é' is two bytes; cutting at 3 must back off to 2.
        assert_eq!(truncate_for_log(s, 3), "é…(+6 bytes)");
    }

    #[test]
    fn test_sanitize_filename_replaces_unsafe_chars() {
        assert_eq!(sanitize_filename("a/b: c?"), "a／b：_c？");
        assert_eq!(sanitize_filename(r#"x\y*z"<>|"#), "x＼y＊z＂＜＞｜");
    }

    #[test]
    fn test_sanitize_filename_collapses_whitespace() {
        assert_eq!(sanitize_filename("  Show   HN:\tThing\n"), "Show_HN：_Thing");
    }

    #[test]
    fn test_sanitize_filename_truncates_long_titles() {
        let title = "t".repeat(150);
        let safe = sanitize_filename(&title);
        assert_eq!(safe.chars().count(), 100);
        assert!(safe.ends_with("..."));
    }

    #[test]
    fn test_sanitize_filename_caps_wide_titles_by_bytes() {
        let title = "量子位报道大模型".repeat(12);
        let safe = sanitize_filename(&title);
        assert_eq!(safe.len(), 180);
        assert!(safe.starts_with("量子位报道大模型"));
        assert!(safe.ends_with("..."));

        let wide_short = "中".repeat(50);
        assert_eq!(sanitize_filename(&wide_short), wide_short);
    }

    #[test]
    fn test_source_dir_name() {
        assert_eq!(source_dir_name("Hacker News"), "Hacker_News");
    }

    #[test]
    fn test_date_stamp_is_eight_digits() {
        let at = Utc.with_ymd_and_hms(2025, 1, 9, 23, 0, 0).unwrap();
        assert_eq!(date_stamp(&at), "20250109");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out/digest.json");
        write_atomic(&target, b"{}").await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{}");
        assert!(!tmp.path().join("out/digest.json.partial").exists());
    }
}
