// SPDX-License-Identifier: MPL-2.0
//! SQLite persistence of articles and classified revision changes.
//!
//! Every worker opens its own [`Store`]. Writes run in autocommit mode, so each upsert is
//! durable once it returns and a crashed worker loses at most the record in flight.

use std::{path::Path, time::Duration};

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{Article, RevisionChange};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open database at {path}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS articles (
    url TEXT PRIMARY KEY,
    coord TEXT
);

CREATE TABLE IF NOT EXISTS revisions (
    id TEXT PRIMARY KEY,
    original_revid INTEGER NOT NULL,
    article_url TEXT NOT NULL REFERENCES articles(url),
    user TEXT,
    timestamp TEXT,
    diff_before TEXT,
    diff_after TEXT,
    change_type TEXT,
    change_desc TEXT,
    bias_score_before REAL,
    bias_score_after REAL,
    bias_delta REAL,
    bias_label_before TEXT,
    bias_label_after TEXT,
    ai_topic TEXT,
    ai_political_stance TEXT,
    is_ip INTEGER,
    content TEXT,
    -- filled in by the labelling tools, never written by the pipeline
    manual_bias TEXT,
    manual_topic TEXT
);

CREATE INDEX IF NOT EXISTS revisions_article_url ON revisions(article_url);
";

const UPSERT_REVISION: &str = "
INSERT INTO revisions (
    id, original_revid, article_url, user, timestamp, diff_before, diff_after,
    change_type, change_desc, bias_score_before, bias_score_after, bias_delta,
    bias_label_before, bias_label_after, ai_topic, ai_political_stance, is_ip, content
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
ON CONFLICT(id) DO UPDATE SET
    original_revid = excluded.original_revid,
    article_url = excluded.article_url,
    user = excluded.user,
    timestamp = excluded.timestamp,
    diff_before = excluded.diff_before,
    diff_after = excluded.diff_after,
    change_type = excluded.change_type,
    change_desc = excluded.change_desc,
    bias_score_before = excluded.bias_score_before,
    bias_score_after = excluded.bias_score_after,
    bias_delta = excluded.bias_delta,
    bias_label_before = excluded.bias_label_before,
    bias_label_after = excluded.bias_label_after,
    ai_topic = excluded.ai_topic,
    ai_political_stance = excluded.ai_political_stance,
    is_ip = excluded.is_ip,
    content = excluded.content
";

const SELECT_REVISION: &str = "
SELECT id, original_revid, article_url, user, timestamp, diff_before, diff_after,
    change_type, change_desc, bias_score_before, bias_score_after,
    bias_label_before, bias_label_after, ai_topic, ai_political_stance, is_ip, content
FROM revisions
";

pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open (creating if needed) the database file. Writers wait up to `lock_timeout` for
    /// a concurrent writer to release the database.
    pub fn open(path: impl AsRef<Path>, lock_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::bootstrap(conn, lock_timeout)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?, Duration::ZERO)
    }

    fn bootstrap(conn: Connection, lock_timeout: Duration) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(lock_timeout)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create the tables if they do not exist yet.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert or overwrite the change with the same id.
    pub fn upsert(&self, change: &RevisionChange) -> Result<(), StoreError> {
        self.conn.execute(
            UPSERT_REVISION,
            params![
                change.id,
                change.original_revision_id,
                change.article_url,
                change.author,
                change.timestamp,
                change.before_text,
                change.after_text,
                change.change_type,
                change.change_description,
                change.bias_score_before,
                change.bias_score_after,
                change.bias_delta(),
                change.bias_label_before,
                change.bias_label_after,
                change.ai_topic,
                change.ai_stance,
                change.is_ip_author,
                change.classification_context,
            ],
        )?;
        Ok(())
    }

    /// Returns `false` if the article was already present.
    pub fn insert_article(&self, article: &Article) -> Result<bool, StoreError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO articles (url, coord) VALUES (?1, ?2)",
            params![article.url, article.coord],
        )?;
        Ok(inserted > 0)
    }

    /// Articles in insertion order.
    pub fn list_articles(&self, limit: Option<usize>) -> Result<Vec<Article>, StoreError> {
        // a negative LIMIT means no limit in SQLite
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut stmt = self
            .conn
            .prepare("SELECT url, coord FROM articles ORDER BY rowid LIMIT ?1")?;
        let articles = stmt
            .query_map([limit], |row| {
                Ok(Article {
                    url: row.get(0)?,
                    coord: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(articles)
    }

    pub fn count_revision_changes(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM revisions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn get_revision_change(&self, id: &str) -> Result<Option<RevisionChange>, StoreError> {
        let change = self
            .conn
            .query_row(
                &format!("{SELECT_REVISION} WHERE id = ?1"),
                [id],
                read_revision_change,
            )
            .optional()?;
        Ok(change)
    }

    pub fn revision_changes_for_article(
        &self,
        article_url: &str,
    ) -> Result<Vec<RevisionChange>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_REVISION} WHERE article_url = ?1 ORDER BY id"))?;
        let changes = stmt
            .query_map([article_url], read_revision_change)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(changes)
    }
}

fn read_revision_change(row: &Row<'_>) -> rusqlite::Result<RevisionChange> {
    Ok(RevisionChange {
        id: row.get(0)?,
        original_revision_id: row.get(1)?,
        article_url: row.get(2)?,
        author: row.get(3)?,
        timestamp: row.get(4)?,
        before_text: row.get(5)?,
        after_text: row.get(6)?,
        change_type: row.get(7)?,
        change_description: row.get(8)?,
        bias_score_before: row.get(9)?,
        bias_score_after: row.get(10)?,
        bias_label_before: row.get(11)?,
        bias_label_after: row.get(12)?,
        ai_topic: row.get(13)?,
        ai_stance: row.get(14)?,
        is_ip_author: row.get(15)?,
        classification_context: row.get(16)?,
    })
}
