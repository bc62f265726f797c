//! Core module - the index engine and its collaborators

pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod reader;
pub mod store;
pub mod tag;
pub mod tag_cache;

pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use events::{DatabaseWatcher, EventHub, IndexEvent};
pub use index::{
    DatabaseLocation, DicomDatabase, FileDescriptions, Identity, ImageRecord, IndexStats,
    IngestSession, InsertOptions, InsertOutcome, PatientRecord, Schema, SchemaUpdateReport,
    SeriesRecord, StudyRecord,
};
pub use reader::{Dataset, DatasetReader, DicomFileReader, ReadError, ThumbnailError, ThumbnailGenerator};
pub use store::{FileStore, ManagedFile};
pub use tag::{tags, Attributes, Tag, TagParseError};
pub use tag_cache::{CacheEntry, CachedTag, TagCache};
