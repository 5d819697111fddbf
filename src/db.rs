use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::cache::{cache_key, Cache};
use crate::error::Result;
use crate::parser::dedupe::SeenIndex;

pub const DOCUMENTS: &str = "documents";
pub const PARSED: &str = "parsed";

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS blobs (
            namespace  TEXT NOT NULL,
            key        TEXT NOT NULL,
            url        TEXT,
            blob       BLOB NOT NULL,
            stored_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (namespace, key)
        );

        -- Legacy cross-run identity index
        CREATE TABLE IF NOT EXISTS seen_items (
            identity_key  TEXT PRIMARY KEY,
            earliest      TEXT,
            last_seen_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Blob cache ──

pub struct SqliteCache<'a> {
    conn: &'a Connection,
    namespace: &'static str,
}

impl<'a> SqliteCache<'a> {
    pub fn new(conn: &'a Connection, namespace: &'static str) -> Self {
        Self { conn, namespace }
    }

    /// Store with the source URL kept alongside, so entries can later be
    /// invalidated by URL.
    pub fn put_for_url(&self, url: &str, blob: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO blobs (namespace, key, url, blob) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![self.namespace, cache_key(url), url, blob],
        )?;
        Ok(())
    }
}

impl Cache for SqliteCache<'_> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blob = self
            .conn
            .query_row(
                "SELECT blob FROM blobs WHERE namespace = ?1 AND key = ?2",
                rusqlite::params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob)
    }

    fn put(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO blobs (namespace, key, blob) VALUES (?1, ?2, ?3)",
            rusqlite::params![self.namespace, key, blob],
        )?;
        Ok(())
    }
}

// ── Invalidation ──

/// Delete cached entries. Removing a document also removes the parsed item
/// list derived from it.
pub fn invalidate_urls(conn: &Connection, urls: &[String], parsed_only: bool) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("DELETE FROM blobs WHERE namespace = ?1 AND key = ?2")?;
        for url in urls {
            let key = cache_key(url);
            count += stmt.execute(rusqlite::params![PARSED, key])?;
            if !parsed_only {
                count += stmt.execute(rusqlite::params![DOCUMENTS, key])?;
            }
        }
    }
    tx.commit()?;
    Ok(count)
}

/// How many entries `invalidate_urls` would delete.
pub fn count_for_urls(conn: &Connection, urls: &[String], parsed_only: bool) -> Result<usize> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM blobs WHERE namespace = ?1 AND key = ?2")?;
    let mut count = 0;
    for url in urls {
        let key = cache_key(url);
        let parsed: usize = stmt.query_row(rusqlite::params![PARSED, key], |r| r.get(0))?;
        count += parsed;
        if !parsed_only {
            let docs: usize = stmt.query_row(rusqlite::params![DOCUMENTS, key], |r| r.get(0))?;
            count += docs;
        }
    }
    Ok(count)
}

pub fn invalidate_all(conn: &Connection, parsed_only: bool) -> Result<usize> {
    let count = if parsed_only {
        conn.execute("DELETE FROM blobs WHERE namespace = ?1", [PARSED])?
    } else {
        conn.execute("DELETE FROM blobs", [])?
    };
    Ok(count)
}

// ── Seen index ──

pub struct SqliteSeenIndex<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSeenIndex<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SeenIndex for SqliteSeenIndex<'_> {
    fn earliest(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT earliest FROM seen_items WHERE identity_key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw
            .flatten()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)))
    }

    fn record(&self, key: &str, date: Option<DateTime<Utc>>) -> Result<()> {
        let date = date.map(|d| d.to_rfc3339());
        self.conn.execute(
            "INSERT INTO seen_items (identity_key, earliest) VALUES (?1, ?2)
             ON CONFLICT(identity_key) DO UPDATE SET
                earliest = CASE
                    WHEN seen_items.earliest IS NULL THEN excluded.earliest
                    WHEN excluded.earliest IS NULL THEN seen_items.earliest
                    WHEN excluded.earliest < seen_items.earliest THEN excluded.earliest
                    ELSE seen_items.earliest
                END,
                last_seen_at = datetime('now')",
            rusqlite::params![key, date],
        )?;
        Ok(())
    }
}

// ── Stats ──

pub struct Stats {
    pub documents: usize,
    pub parsed: usize,
    pub seen: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count_ns = |ns: &str| -> Result<usize> {
        Ok(conn.query_row("SELECT COUNT(*) FROM blobs WHERE namespace = ?1", [ns], |r| r.get(0))?)
    };
    let seen: usize = conn.query_row("SELECT COUNT(*) FROM seen_items", [], |r| r.get(0))?;
    Ok(Stats {
        documents: count_ns(DOCUMENTS)?,
        parsed: count_ns(PARSED)?,
        seen,
    })
}
