//! SQLite-backed DICOM index
//!
//! The index keeps a Patient -> Study -> Series -> Image hierarchy in one
//! SQLite file and a per-instance tag cache in a second file next to it, so
//! a long write on one never blocks readers of the other.
//!
//! Mutations return `Result` and also record the failure text, retrievable
//! through [`DicomDatabase::last_error`]. Lookups return empty results.

mod hierarchy;
mod ingest;
mod queries;
mod schema;
mod types;
mod values;

pub use ingest::{Identity, IngestSession, InsertOptions, InsertOutcome};
pub use schema::Schema;
pub use types::*;

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::core::config::IndexConfig;
use crate::core::error::{IndexError, Result, StatementContext};
use crate::core::events::{DatabaseWatcher, EventHub, IndexEvent};
use crate::core::reader::{DatasetReader, ThumbnailGenerator};
use crate::core::store::FileStore;
use crate::core::tag::Tag;
use crate::core::tag_cache::{TagCache, TAG_CACHE_FILE};

/// The index, its tag cache and its file store
pub struct DicomDatabase {
    conn: Connection,
    /// Absolute path of the index file, `None` in memory
    database_file: Option<PathBuf>,
    /// Managed file store, `None` in memory
    store: Option<FileStore>,
    tag_cache: TagCache,
    config: IndexConfig,
    events: EventHub,
    reader: Box<dyn DatasetReader>,
    thumbnailer: Option<Box<dyn ThumbnailGenerator>>,
    last_error: Option<String>,
    /// Bumped whenever rows may disappear; stale sessions reset themselves
    generation: u64,
    _watcher: Option<DatabaseWatcher>,
}

impl DicomDatabase {
    /// Open or create the index at `location` with layered configuration
    pub fn open(location: impl Into<DatabaseLocation>, reader: Box<dyn DatasetReader>) -> Result<Self> {
        let location = location.into();
        let config = match &location {
            DatabaseLocation::File(path) => {
                IndexConfig::load(path.parent().unwrap_or_else(|| Path::new(".")))
            }
            DatabaseLocation::InMemory => IndexConfig::default(),
        };
        Self::open_with_config(location, reader, config)
    }

    /// Open or create the index at `location` with explicit configuration
    pub fn open_with_config(
        location: impl Into<DatabaseLocation>,
        reader: Box<dyn DatasetReader>,
        config: IndexConfig,
    ) -> Result<Self> {
        let location = location.into();
        let (conn, database_file) = match &location {
            DatabaseLocation::File(path) => {
                let path = absolute_database_path(path)?;
                let conn = Connection::open(&path).map_err(|source| IndexError::Open {
                    path: path.clone(),
                    source,
                })?;
                (conn, Some(path))
            }
            DatabaseLocation::InMemory => {
                let conn = Connection::open_in_memory().map_err(|source| IndexError::Open {
                    path: PathBuf::from(IN_MEMORY),
                    source,
                })?;
                (conn, None)
            }
        };

        if !config.synchronous_writes {
            conn.pragma_update(None, "synchronous", "OFF")
                .with_sql("PRAGMA synchronous = OFF")?;
        }

        let directory = database_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        let tag_cache = TagCache::open(
            directory.as_ref().map(|d| d.join(TAG_CACHE_FILE)).as_deref(),
            config.synchronous_writes,
        )?;
        let store = directory.map(FileStore::new);

        let events = EventHub::new();
        let watcher = database_file.as_deref().and_then(|file| {
            match DatabaseWatcher::watch(file, events.clone()) {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(path = %file.display(), error = %e, "cannot watch database file");
                    None
                }
            }
        });

        let mut db = Self {
            conn,
            database_file,
            store,
            tag_cache,
            config,
            events,
            reader,
            thumbnailer: None,
            last_error: None,
            generation: 0,
            _watcher: watcher,
        };

        if !db.has_tables() {
            db.initialize_schema(&Schema::CURRENT)?;
        } else if db.schema_update_needed() {
            tracing::warn!(
                loaded = ?db.schema_version_loaded(),
                current = db.schema_version(),
                "index schema is out of date"
            );
        }

        tracing::debug!(database = %db.database_filename().display(), "opened index");
        Ok(db)
    }

    /// Close the index connection
    pub fn close(self) -> Result<()> {
        let path = self.database_filename().to_path_buf();
        let DicomDatabase { conn, .. } = self;
        conn.close()
            .map_err(|(_, source)| IndexError::Close { path, source })
    }

    fn has_tables(&self) -> bool {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .unwrap_or(false)
    }

    /// Store the outcome of a mutation as the last error (or clear it)
    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => self.last_error = Some(e.to_string()),
        }
        result
    }

    /// Text of the most recent mutation failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_file.is_none()
    }

    /// Absolute path of the index file (`:memory:` when in memory)
    pub fn database_filename(&self) -> &Path {
        self.database_file
            .as_deref()
            .unwrap_or_else(|| Path::new(IN_MEMORY))
    }

    /// Directory holding the index, tag cache and file store
    pub fn database_directory(&self) -> PathBuf {
        match self.store.as_ref() {
            Some(store) => store.root().to_path_buf(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn file_store(&self) -> Option<&FileStore> {
        self.store.as_ref()
    }

    pub fn tag_cache(&mut self) -> &mut TagCache {
        &mut self.tag_cache
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn set_thumbnail_generator(&mut self, generator: Option<Box<dyn ThumbnailGenerator>>) {
        self.thumbnailer = generator;
    }

    pub fn thumbnail_generator(&self) -> Option<&dyn ThumbnailGenerator> {
        self.thumbnailer.as_deref()
    }

    pub fn set_tags_to_precache(&mut self, tags: Vec<Tag>) {
        self.config.tags_to_precache = tags;
    }

    pub fn tags_to_precache(&self) -> &[Tag] {
        &self.config.tags_to_precache
    }

    /// Register a listener for structural changes
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&IndexEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener);
    }
}

/// Create the parent directory and make the path absolute
fn absolute_database_path(path: &Path) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let file_name = path.file_name().ok_or_else(|| IndexError::Config {
        path: path.to_path_buf(),
        message: "database location has no file name".to_string(),
    })?;
    Ok(parent.canonicalize()?.join(file_name))
}
