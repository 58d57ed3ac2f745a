//! Crawlers as external processes.
//!
//! A crawler is any program that prints a JSON array of article records on
//! standard output and exits zero. Crawlers are distinguished only by their
//! configured command line; the pipeline never knows what language they are
//! written in or how they discover articles.
//!
//! The command string is split on whitespace into a program and arguments and
//! executed directly (no shell), with the working directory pinned to the
//! script root and a hard timeout. A crawler that runs past its timeout is
//! killed.

use crate::error::CrawlerError;
use crate::models::{CandidateArticle, Source};
use crate::utils::truncate_for_log;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

/// A crawler invocation: program, arguments, working directory and deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlerCommand {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CrawlerCommand {
    /// Build a command from a whitespace-separated command line.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlerError::EmptyCommand`] when `command_line` has no tokens.
    pub fn parse(
        command_line: &str,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, CrawlerError> {
        let mut tokens = command_line.split_whitespace().map(str::to_string);
        let program = tokens.next().ok_or(CrawlerError::EmptyCommand)?;
        Ok(Self {
            program,
            args: tokens.collect(),
            working_dir: working_dir.into(),
            timeout,
        })
    }

    /// Run the process to completion and parse its output.
    #[instrument(level = "info", skip_all, fields(program = %self.program))]
    pub async fn execute(&self) -> Result<Vec<CandidateArticle>, CrawlerError> {
        let t0 = Instant::now();
        info!(
            args = ?self.args,
            cwd = %self.working_dir.display(),
            timeout = ?self.timeout,
            "Starting crawler"
        );

        let child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CrawlerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping the pending future drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                error!(timeout = ?self.timeout, "Crawler timed out; killed");
                return Err(CrawlerError::Timeout(self.timeout));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(CrawlerError::NonZeroExit {
                status: output.status.to_string(),
                stderr: truncate_for_log(stderr.trim(), 2_000),
            });
        }
        if !stderr.trim().is_empty() {
            warn!(stderr = %truncate_for_log(stderr.trim(), 2_000), "Crawler wrote to stderr");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let candidates = parse_crawler_output(&stdout)?;
        info!(
            count = candidates.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Crawler finished"
        );
        Ok(candidates)
    }
}

/// Parse the crawler's standard output.
///
/// The whole output must be one JSON array; every element must carry
/// `title`, `url` and `published_date`.
pub fn parse_crawler_output(stdout: &str) -> Result<Vec<CandidateArticle>, CrawlerError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(CrawlerError::EmptyOutput);
    }
    let candidates: Vec<CandidateArticle> = serde_json::from_str(trimmed).inspect_err(|e| {
        debug!(error = %e, preview = %truncate_for_log(trimmed, 200), "Unparseable crawler output");
    })?;
    if candidates.is_empty() {
        warn!("Crawler returned an empty list");
    }
    Ok(candidates)
}

/// Produces the candidate list for one source.
pub trait CrawlerRunner {
    async fn run(&self, source: &Source) -> Result<Vec<CandidateArticle>, CrawlerError>;
}

/// Runs each source's configured command as a child process.
#[derive(Debug, Clone)]
pub struct ProcessCrawlerRunner {
    script_root: PathBuf,
    timeout: Duration,
}

impl ProcessCrawlerRunner {
    pub fn new(script_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            script_root: script_root.into(),
            timeout,
        }
    }
}

impl CrawlerRunner for ProcessCrawlerRunner {
    async fn run(&self, source: &Source) -> Result<Vec<CandidateArticle>, CrawlerError> {
        CrawlerCommand::parse(&source.crawler_command, &self.script_root, self.timeout)?
            .execute()
            .await
    }
}
