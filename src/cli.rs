//! Command-line interface definitions for the digest pipeline.
//!
//! The configuration path and proxy can also come from the environment
//! (`DIGEST_CONFIG`, `DIGEST_PROXY_URL`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # One batch, at most five articles per source, with debug dumps
/// awful_news_digest run -n 5 -d
///
/// # Only acquire and extract one source
/// awful_news_digest run --source "Hacker News" --extract-only
///
/// # Run daily at 06:30
/// awful_news_digest daemon --daily-time 06:30
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, env = "DIGEST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Proxy used for the fallback fetch attempt (overrides config)
    #[arg(long, env = "DIGEST_PROXY_URL", global = true)]
    pub proxy_url: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run one batch now
    Run {
        /// Process at most N articles per source
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Dump uncapped extracted text to the scratch directory
        #[arg(short, long)]
        debug: bool,

        /// Only run this source
        #[arg(long)]
        source: Option<String>,

        /// Stop after extraction; no summaries, no digest
        #[arg(long)]
        extract_only: bool,
    },
    /// Run the batch every day at a fixed local time
    Daemon {
        /// HH:MM local time (overrides config)
        #[arg(long)]
        daily_time: Option<String>,
    },
    /// Manage the source registry
    Sources {
        #[command(subcommand)]
        action: SourcesCommand,
    },
    /// Article counts per source and status
    Stats,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum SourcesCommand {
    List,
    /// Register a source
    Add {
        name: String,
        /// Crawler command line, run from the script root
        command: String,
        /// Cover image for the digest
        #[arg(long)]
        media: Option<String>,
    },
    Enable { name: String },
    Disable { name: String },
    /// Set the cover image for a source
    Media { name: String, path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(&[
            "awful_news_digest",
            "--config",
            "./config.yaml",
            "run",
            "--limit",
            "5",
            "--source",
            "Hacker News",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("./config.yaml")));
        assert_eq!(
            cli.command,
            Command::Run {
                limit: Some(5),
                debug: false,
                source: Some("Hacker News".to_string()),
                extract_only: false,
            }
        );
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(&["awful_news_digest", "run", "-n", "3", "-d", "-v"]);

        assert!(cli.verbose);
        match cli.command {
            Command::Run { limit, debug, .. } => {
                assert_eq!(limit, Some(3));
                assert!(debug);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_daemon_and_sources() {
        let cli = Cli::parse_from(&["awful_news_digest", "daemon", "--daily-time", "06:30"]);
        assert_eq!(
            cli.command,
            Command::Daemon {
                daily_time: Some("06:30".to_string())
            }
        );

        let cli = Cli::parse_from(&[
            "awful_news_digest",
            "sources",
            "add",
            "QbitAI",
            "python crawler_qbitai.py",
            "--media",
            "./media/qbitai.jpg",
        ]);
        assert_eq!(
            cli.command,
            Command::Sources {
                action: SourcesCommand::Add {
                    name: "QbitAI".to_string(),
                    command: "python crawler_qbitai.py".to_string(),
                    media: Some("./media/qbitai.jpg".to_string()),
                }
            }
        );
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(&["awful_news_digest"]).is_err());
    }
}
