//! Persistent (instance, tag) -> value cache
//!
//! The cache lives in its own SQLite file next to the index so that long
//! write transactions on one store never block readers of the other.
//!
//! Values are three-valued: a tag can be absent from the cache (never looked
//! up), cached as not present in the instance, or cached with a value (which
//! may be empty). In the table, "not present" is a NULL `Value`.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::core::error::{IndexError, Result, StatementContext};
use crate::core::tag::Tag;

/// File name of the tag cache, placed in the index's directory
pub const TAG_CACHE_FILE: &str = "dicom-tag-cache.sqlite";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS TagCache (
    SOPInstanceUID TEXT NOT NULL,
    Tag TEXT NOT NULL,
    Value TEXT,
    PRIMARY KEY (SOPInstanceUID, Tag)
)";
const SELECT_VALUE: &str = "SELECT Value FROM TagCache WHERE SOPInstanceUID = ?1 AND Tag = ?2";
const INSERT_OR_REPLACE: &str =
    "INSERT OR REPLACE INTO TagCache (SOPInstanceUID, Tag, Value) VALUES (?1, ?2, ?3)";

/// A cached attribute lookup result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedTag {
    /// The tag does not exist in the instance
    NotPresent,
    /// The tag exists with an empty value
    Empty,
    Value(String),
}

impl CachedTag {
    /// Classify the outcome of reading a tag from a dataset
    pub fn from_read(value: Option<&str>) -> Self {
        match value {
            None => CachedTag::NotPresent,
            Some("") => CachedTag::Empty,
            Some(v) => CachedTag::Value(v.to_string()),
        }
    }

    /// The value as callers see it; not-present reads as empty
    pub fn as_str(&self) -> &str {
        match self {
            CachedTag::Value(v) => v,
            CachedTag::NotPresent | CachedTag::Empty => "",
        }
    }

    fn to_column(&self) -> Option<&str> {
        match self {
            CachedTag::NotPresent => None,
            CachedTag::Empty => Some(""),
            CachedTag::Value(v) => Some(v),
        }
    }

    fn from_column(column: Option<String>) -> Self {
        match column {
            None => CachedTag::NotPresent,
            Some(v) if v.is_empty() => CachedTag::Empty,
            Some(v) => CachedTag::Value(v),
        }
    }
}

/// One row for [`TagCache::store_batch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub sop_instance_uid: String,
    pub tag: Tag,
    pub value: CachedTag,
}

/// The tag cache backed by SQLite
pub struct TagCache {
    conn: Connection,
    /// `None` for an in-memory cache
    path: Option<PathBuf>,
    synchronous_writes: bool,
    /// The TagCache table has been checked to exist
    verified: bool,
}

impl TagCache {
    /// Open or create the cache at `path` (`None` keeps it in memory)
    pub fn open(path: Option<&Path>, synchronous_writes: bool) -> Result<Self> {
        let conn = Self::connect(path, synchronous_writes)?;
        let mut cache = Self {
            conn,
            path: path.map(Path::to_path_buf),
            synchronous_writes,
            verified: false,
        };
        cache.ensure_ready()?;
        Ok(cache)
    }

    /// Path of the cache file, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connect(path: Option<&Path>, synchronous_writes: bool) -> Result<Connection> {
        let conn = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path).map_err(|source| IndexError::Open {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Connection::open_in_memory().map_err(|source| IndexError::Open {
                path: PathBuf::from(":memory:"),
                source,
            })?,
        };

        if !synchronous_writes {
            conn.pragma_update(None, "synchronous", "OFF")
                .with_sql("PRAGMA synchronous = OFF")?;
        }
        Ok(conn)
    }

    /// Whether the cache table exists
    pub fn exists(&self) -> bool {
        if let Some(path) = &self.path {
            if !path.exists() {
                return false;
            }
        }
        self.table_present()
    }

    fn table_present(&self) -> bool {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'TagCache'",
                [],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .unwrap_or(false)
    }

    /// Drop any existing cache table and create an empty one
    pub fn initialize(&mut self) -> Result<()> {
        self.reconnect_if_deleted()?;
        let tx = self.conn.transaction().with_sql("BEGIN")?;
        tx.execute_batch("DROP TABLE IF EXISTS TagCache")
            .with_sql("DROP TABLE IF EXISTS TagCache")?;
        tx.execute_batch(CREATE_TABLE).with_sql(CREATE_TABLE)?;
        tx.commit().with_sql("COMMIT")?;
        self.verified = true;
        Ok(())
    }

    /// Recreate the file and table if either has gone missing
    fn ensure_ready(&mut self) -> Result<()> {
        if self.reconnect_if_deleted()? {
            self.verified = false;
        }
        if self.verified {
            return Ok(());
        }
        let tx = self.conn.transaction().with_sql("BEGIN")?;
        tx.execute_batch(CREATE_TABLE).with_sql(CREATE_TABLE)?;
        tx.commit().with_sql("COMMIT")?;
        self.verified = true;
        Ok(())
    }

    fn reconnect_if_deleted(&mut self) -> Result<bool> {
        match &self.path {
            Some(path) if !path.exists() => {
                tracing::info!(path = %path.display(), "tag cache file missing, recreating");
                self.conn = Self::connect(Some(path), self.synchronous_writes)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Look up a cached value; `None` means the tag was never cached
    pub fn lookup(&mut self, sop_instance_uid: &str, tag: Tag) -> Option<CachedTag> {
        if let Err(e) = self.ensure_ready() {
            tracing::warn!(error = %e, "tag cache unavailable");
            return None;
        }

        match self.select(sop_instance_uid, tag) {
            Ok(found) => found,
            Err(_) if !self.table_present() => {
                // Table dropped behind our back; heal and report a miss
                self.verified = false;
                if let Err(e) = self.ensure_ready() {
                    tracing::warn!(error = %e, "tag cache unavailable");
                }
                None
            }
            Err(e) => {
                tracing::error!(sql = SELECT_VALUE, error = %e, "SQL failed");
                None
            }
        }
    }

    fn select(&self, sop_instance_uid: &str, tag: Tag) -> rusqlite::Result<Option<CachedTag>> {
        let mut stmt = self.conn.prepare_cached(SELECT_VALUE)?;
        stmt.query_row(params![sop_instance_uid, tag.to_string()], |row| {
            row.get::<_, Option<String>>(0)
        })
        .optional()
        .map(|found| found.map(CachedTag::from_column))
    }

    /// Store a single value
    pub fn store(&mut self, sop_instance_uid: &str, tag: Tag, value: &CachedTag) -> Result<()> {
        self.store_batch(&[CacheEntry {
            sop_instance_uid: sop_instance_uid.to_string(),
            tag,
            value: value.clone(),
        }])
    }

    /// Store many values in one transaction
    pub fn store_batch(&mut self, entries: &[CacheEntry]) -> Result<()> {
        self.ensure_ready()?;
        match self.write_batch(entries) {
            Err(IndexError::Statement { .. }) if !self.table_present() => {
                self.verified = false;
                self.ensure_ready()?;
                self.write_batch(entries)
            }
            other => other,
        }
    }

    fn write_batch(&mut self, entries: &[CacheEntry]) -> Result<()> {
        let tx = self.conn.transaction().with_sql("BEGIN")?;
        {
            let mut stmt = tx.prepare_cached(INSERT_OR_REPLACE).with_sql(INSERT_OR_REPLACE)?;
            for entry in entries {
                stmt.execute(params![
                    entry.sop_instance_uid,
                    entry.tag.to_string(),
                    entry.value.to_column()
                ])
                .with_sql(INSERT_OR_REPLACE)?;
            }
        }
        tx.commit().with_sql("COMMIT")?;
        Ok(())
    }

    /// Forget every cached value of one instance
    pub fn remove_instance(&mut self, sop_instance_uid: &str) -> Result<usize> {
        self.ensure_ready()?;
        const SQL: &str = "DELETE FROM TagCache WHERE SOPInstanceUID = ?1";
        self.conn
            .execute(SQL, params![sop_instance_uid])
            .with_sql(SQL)
    }

    /// Forget everything
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.conn
            .execute_batch("DELETE FROM TagCache")
            .with_sql("DELETE FROM TagCache")
    }

    pub fn entry_count(&mut self) -> usize {
        if self.ensure_ready().is_err() {
            return 0;
        }
        self.conn
            .query_row("SELECT COUNT(*) FROM TagCache", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .unwrap_or(0)
    }
}
