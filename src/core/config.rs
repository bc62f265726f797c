//! Configuration management with layered hierarchy

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::core::tag::Tag;

/// File name of the per-database configuration, next to the index file
pub const DATABASE_CONFIG_FILE: &str = "dicom-index.yaml";

/// Index configuration with layered hierarchy
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Tags warmed into the tag cache whenever an instance is inserted
    pub tags_to_precache: Vec<Tag>,

    /// Copy inserted files into the managed `dicom/` directory
    pub store_files: bool,

    /// Ask the thumbnail generator for a thumbnail on insert
    pub generate_thumbnails: bool,

    /// Keep SQLite's synchronous writes on (off trades durability for speed)
    pub synchronous_writes: bool,

    /// Log every mutating statement at debug level
    pub log_sql: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            tags_to_precache: Vec::new(),
            store_files: true,
            generate_thumbnails: true,
            synchronous_writes: false,
            log_sql: false,
        }
    }
}

/// Partial config as found in a single file; unset fields do not override
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    tags_to_precache: Option<Vec<Tag>>,
    store_files: Option<bool>,
    generate_thumbnails: Option<bool>,
    synchronous_writes: Option<bool>,
    log_sql: Option<bool>,
}

impl IndexConfig {
    /// Load configuration for a database directory, merging in priority order
    pub fn load(database_directory: &Path) -> Self {
        // 1. Built-in defaults
        let mut config = IndexConfig::default();

        // 2. Global user config (~/.config/dicom-index/config.yaml)
        if let Some(global_path) = Self::global_config_path() {
            config.merge_file(&global_path);
        }

        // 3. Database config (<database dir>/dicom-index.yaml)
        config.merge_file(&database_directory.join(DATABASE_CONFIG_FILE));

        // 4. Environment variables
        config.merge_env();

        config
    }

    /// Get the path to the global config file
    fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "dicom-index")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    fn merge_file(&mut self, path: &Path) {
        if !path.exists() {
            return;
        }
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unable to read config");
                return;
            }
        };
        match serde_yml::from_str::<ConfigLayer>(&contents) {
            Ok(layer) => self.merge(layer),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config");
            }
        }
    }

    fn merge_env(&mut self) {
        if let Ok(tags) = std::env::var("DICOM_INDEX_PRECACHE") {
            let parsed: Vec<Tag> = tags
                .split(';')
                .filter(|t| !t.trim().is_empty())
                .filter_map(|t| match t.parse() {
                    Ok(tag) => Some(tag),
                    Err(e) => {
                        tracing::warn!(error = %e, "ignoring tag in DICOM_INDEX_PRECACHE");
                        None
                    }
                })
                .collect();
            self.tags_to_precache = parsed;
        }
        if let Some(store) = env_flag("DICOM_INDEX_STORE_FILES") {
            self.store_files = store;
        }
        if let Some(thumbs) = env_flag("DICOM_INDEX_THUMBNAILS") {
            self.generate_thumbnails = thumbs;
        }
    }

    /// Merge a layer into this config (layer takes precedence)
    fn merge(&mut self, other: ConfigLayer) {
        if let Some(tags) = other.tags_to_precache {
            self.tags_to_precache = tags;
        }
        if let Some(store) = other.store_files {
            self.store_files = store;
        }
        if let Some(thumbs) = other.generate_thumbnails {
            self.generate_thumbnails = thumbs;
        }
        if let Some(sync) = other.synchronous_writes {
            self.synchronous_writes = sync;
        }
        if let Some(log_sql) = other.log_sql {
            self.log_sql = log_sql;
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
