//! Index type definitions
//!
//! Row types returned by navigation queries, plus small value types used by
//! the facade.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Sentinel location string selecting an ephemeral database
pub const IN_MEMORY: &str = ":memory:";

/// Where the index lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    /// No file system persistence, no file store, no watcher
    InMemory,
}

impl DatabaseLocation {
    /// Interpret a caller-supplied location, honouring the `:memory:` sentinel
    pub fn parse(location: impl AsRef<Path>) -> Self {
        let location = location.as_ref();
        if location.as_os_str() == IN_MEMORY {
            DatabaseLocation::InMemory
        } else {
            DatabaseLocation::File(location.to_path_buf())
        }
    }
}

impl From<&Path> for DatabaseLocation {
    fn from(path: &Path) -> Self {
        DatabaseLocation::parse(path)
    }
}

impl From<PathBuf> for DatabaseLocation {
    fn from(path: PathBuf) -> Self {
        DatabaseLocation::parse(path)
    }
}

impl From<&str> for DatabaseLocation {
    fn from(location: &str) -> Self {
        DatabaseLocation::parse(location)
    }
}

// =========================================================================
// Hierarchy rows
// =========================================================================

/// A row of the Patients table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientRecord {
    pub uid: i64,
    pub patients_name: String,
    pub patient_id: String,
    /// ISO `yyyy-mm-dd` when the source date was valid
    pub birth_date: String,
    pub birth_time: String,
    pub sex: String,
    pub age: String,
    pub comments: String,
}

/// A row of the Studies table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyRecord {
    pub study_instance_uid: String,
    pub patients_uid: i64,
    pub study_id: String,
    pub study_date: String,
    pub study_time: String,
    pub accession_number: String,
    pub modalities_in_study: String,
    pub institution_name: String,
    pub referring_physician: String,
    pub performing_physicians_name: String,
    pub study_description: String,
}

/// A row of the Series table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesRecord {
    pub series_instance_uid: String,
    pub study_instance_uid: String,
    pub series_number: i64,
    pub series_date: String,
    pub series_time: String,
    pub series_description: String,
    pub modality: String,
    pub body_part_examined: String,
    pub frame_of_reference_uid: String,
    pub acquisition_number: i64,
    pub contrast_agent: String,
    pub scanning_sequence: String,
    pub echo_number: i64,
    pub temporal_position: i64,
}

/// A row of the Images table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub sop_instance_uid: String,
    pub filename: String,
    pub series_instance_uid: String,
    pub insert_timestamp: Option<DateTime<Utc>>,
}

/// Human-readable context of one indexed file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileDescriptions {
    pub series_description: String,
    pub study_description: String,
    pub patients_name: String,
}

/// Row counts of both stores
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub patients: usize,
    pub studies: usize,
    pub series: usize,
    pub images: usize,
    pub cached_tags: usize,
}

/// Outcome of a schema rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaUpdateReport {
    /// Files found in the backed-up file list
    pub total: usize,
    /// Files indexed again under the new schema
    pub reinserted: usize,
    /// Files that could not be re-indexed, with the reason
    pub failed: Vec<(String, String)>,
}

impl SchemaUpdateReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Parse a stored RFC 3339 timestamp
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
