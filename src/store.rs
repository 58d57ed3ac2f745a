//! SQLite-backed source registry and article store.
//!
//! The store is the only shared mutable state in the pipeline. It is written
//! by a single logical writer per run, so each operation is a single atomic
//! statement and no extra locking is layered on top.
//!
//! Articles are never deleted. `(source_name, url)` is unique, which makes the
//! dedup key a storage-level guarantee rather than a convention.

use crate::error::StoreError;
use crate::models::{Article, ArticleStatus, CandidateArticle, Source};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub type StoreResult<T> = Result<T, StoreError>;

const ARTICLE_COLUMNS: &str = "id, source_name, title, url, published_date, comments_url, \
     local_text_path, summary_path, status, attempts, last_error, first_seen_at, processed_at";

pub struct ArticleStore {
    conn: Connection,
}

impl ArticleStore {
    /// Open (or create) the database file and ensure the schema exists.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self { conn };
        store.init_schema()?;
        info!("Article store ready");
        Ok(store)
    }

    /// Private in-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                name TEXT PRIMARY KEY,
                crawler_command TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                media_path TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_name TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                published_date TEXT NOT NULL,
                comments_url TEXT,
                local_text_path TEXT,
                summary_path TEXT,
                status TEXT NOT NULL DEFAULT 'discovered',
                attempts INTEGER NOT NULL DEFAULT 1,
                last_error TEXT,
                first_seen_at TEXT NOT NULL,
                processed_at TEXT,
                UNIQUE(source_name, url)
            );

            CREATE INDEX IF NOT EXISTS idx_articles_source_status
                ON articles(source_name, status);
        "#,
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Source registry
    // -------------------------------------------------------------------------

    /// Register a source if its name is unknown. Returns `true` when inserted.
    ///
    /// An existing source keeps its activation flag so operator toggles
    /// survive restarts; its command and media path follow the configuration.
    pub fn upsert_source(&self, source: &Source) -> StoreResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO sources (name, crawler_command, active, media_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source.name,
                source.crawler_command,
                source.active,
                source.media_path,
                Utc::now().to_rfc3339()
            ],
        )?;
        if inserted == 0 {
            self.conn.execute(
                "UPDATE sources SET crawler_command = ?2, media_path = COALESCE(?3, media_path)
                 WHERE name = ?1",
                params![source.name, source.crawler_command, source.media_path],
            )?;
        }
        Ok(inserted > 0)
    }

    pub fn get_source(&self, name: &str) -> StoreResult<Option<Source>> {
        Ok(self
            .conn
            .query_row(
                "SELECT name, crawler_command, active, media_path FROM sources WHERE name = ?1",
                params![name],
                row_to_source,
            )
            .optional()?)
    }

    pub fn list_sources(&self, active_only: bool) -> StoreResult<Vec<Source>> {
        let sql = if active_only {
            "SELECT name, crawler_command, active, media_path FROM sources
             WHERE active = 1 ORDER BY created_at, name"
        } else {
            "SELECT name, crawler_command, active, media_path FROM sources
             ORDER BY created_at, name"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_source)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Toggle a source. Returns `false` when no such source exists.
    pub fn set_source_active(&self, name: &str, active: bool) -> StoreResult<bool> {
        let n = self.conn.execute(
            "UPDATE sources SET active = ?2 WHERE name = ?1",
            params![name, active],
        )?;
        Ok(n > 0)
    }

    pub fn set_source_media(&self, name: &str, media_path: &str) -> StoreResult<bool> {
        let n = self.conn.execute(
            "UPDATE sources SET media_path = ?2 WHERE name = ?1",
            params![name, media_path],
        )?;
        Ok(n > 0)
    }

    // -------------------------------------------------------------------------
    // Articles
    // -------------------------------------------------------------------------

    pub fn find_article(&self, source_name: &str, url: &str) -> StoreResult<Option<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE source_name = ?1 AND url = ?2");
        self.conn
            .query_row(&sql, params![source_name, url], |row| Ok(row_to_article(row)))
            .optional()?
            .transpose()
    }

    pub fn get_article(&self, id: i64) -> StoreResult<Article> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id], |row| Ok(row_to_article(row)))
            .optional()?
            .ok_or(StoreError::MissingArticle(id))?
    }

    /// Record a newly discovered article.
    #[instrument(level = "debug", skip_all, fields(source = %source_name, url = %candidate.url))]
    pub fn insert_discovered(
        &self,
        source_name: &str,
        candidate: &CandidateArticle,
    ) -> StoreResult<Article> {
        self.conn.execute(
            "INSERT INTO articles (source_name, title, url, published_date, comments_url,
                                   status, attempts, first_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
            params![
                source_name,
                candidate.title,
                candidate.url,
                candidate.published_date,
                candidate.comments_url,
                ArticleStatus::Discovered.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, "Inserted discovered article");
        self.get_article(id)
    }

    /// Put a record that never completed extraction back to `discovered` and
    /// count the attempt. Metadata is refreshed from the latest crawl.
    pub fn begin_retry(&self, article: &Article, candidate: &CandidateArticle) -> StoreResult<Article> {
        self.check_transition(article.id, article.status, ArticleStatus::Discovered)?;
        self.conn.execute(
            "UPDATE articles SET status = ?2, attempts = attempts + 1, last_error = NULL,
                                 title = ?3, published_date = ?4, comments_url = ?5
             WHERE id = ?1",
            params![
                article.id,
                ArticleStatus::Discovered.as_str(),
                candidate.title,
                candidate.published_date,
                candidate.comments_url,
            ],
        )?;
        self.get_article(article.id)
    }

    pub fn mark_fetched(&self, id: i64) -> StoreResult<()> {
        self.transition(id, ArticleStatus::Fetched, None)
    }

    pub fn mark_extracted(&self, id: i64, local_text_path: &str) -> StoreResult<()> {
        self.transition(id, ArticleStatus::Extracted, None)?;
        self.conn.execute(
            "UPDATE articles SET local_text_path = ?2 WHERE id = ?1",
            params![id, local_text_path],
        )?;
        Ok(())
    }

    pub fn mark_summarized(&self, id: i64, summary_path: &str) -> StoreResult<()> {
        self.transition(id, ArticleStatus::Summarized, None)?;
        self.conn.execute(
            "UPDATE articles SET summary_path = ?2 WHERE id = ?1",
            params![id, summary_path],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, id: i64, error: &str) -> StoreResult<()> {
        self.transition(id, ArticleStatus::Failed, Some(error))
    }

    fn transition(&self, id: i64, next: ArticleStatus, error: Option<&str>) -> StoreResult<()> {
        let current = self.status_of(id)?;
        self.check_transition(id, current, next)?;
        self.conn.execute(
            "UPDATE articles SET status = ?2, last_error = ?3, processed_at = ?4 WHERE id = ?1",
            params![id, next.as_str(), error, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn check_transition(&self, id: i64, from: ArticleStatus, to: ArticleStatus) -> StoreResult<()> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(StoreError::InvalidTransition {
                id,
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn status_of(&self, id: i64) -> StoreResult<ArticleStatus> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT status FROM articles WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        let raw = raw.ok_or(StoreError::MissingArticle(id))?;
        ArticleStatus::parse(&raw).ok_or(StoreError::UnknownStatus(raw))
    }

    /// Articles of one source in a given status, oldest first.
    pub fn articles_with_status(
        &self,
        source_name: &str,
        status: ArticleStatus,
    ) -> StoreResult<Vec<Article>> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE source_name = ?1 AND status = ?2 ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![source_name, status.as_str()], |row| {
            Ok(row_to_article(row))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn count_articles(&self, source_name: Option<&str>) -> StoreResult<u64> {
        let n: i64 = match source_name {
            Some(name) => self.conn.query_row(
                "SELECT COUNT(*) FROM articles WHERE source_name = ?1",
                params![name],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?,
        };
        Ok(n as u64)
    }

    /// Article counts per source and status.
    pub fn status_counts(&self) -> StoreResult<BTreeMap<String, BTreeMap<ArticleStatus, u64>>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_name, status, COUNT(*) FROM articles GROUP BY source_name, status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut out: BTreeMap<String, BTreeMap<ArticleStatus, u64>> = BTreeMap::new();
        for row in rows {
            let (source, raw, n) = row?;
            let status = ArticleStatus::parse(&raw).ok_or(StoreError::UnknownStatus(raw))?;
            out.entry(source).or_default().insert(status, n as u64);
        }
        Ok(out)
    }
}

fn row_to_source(row: &Row) -> rusqlite::Result<Source> {
    Ok(Source {
        name: row.get(0)?,
        crawler_command: row.get(1)?,
        active: row.get(2)?,
        media_path: row.get(3)?,
    })
}

/// Decode one article row. The outer error is SQLite's; the inner one covers
/// values SQLite stored fine but this crate cannot interpret.
fn row_to_article(row: &Row) -> StoreResult<Article> {
    let raw_status: String = row.get(8)?;
    let status =
        ArticleStatus::parse(&raw_status).ok_or(StoreError::UnknownStatus(raw_status))?;
    let first_seen: String = row.get(11)?;
    let processed: Option<String> = row.get(12)?;
    Ok(Article {
        id: row.get(0)?,
        source_name: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        published_date: row.get(4)?,
        comments_url: row.get(5)?,
        local_text_path: row.get(6)?,
        summary_path: row.get(7)?,
        status,
        attempts: row.get::<_, i64>(9)? as u32,
        last_error: row.get(10)?,
        first_seen_at: parse_ts(&first_seen).unwrap_or_else(Utc::now),
        processed_at: processed.as_deref().and_then(parse_ts),
    })
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
