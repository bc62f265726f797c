//! Single-instance ingestion
//!
//! An insert runs: dedup check, attribute extraction, identity resolution,
//! file placement, hierarchy upsert (one transaction), cache warm-up,
//! thumbnail, notifications. Nothing is written to the index before the file
//! is in place, so a row never references an unwritten file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use super::hierarchy::Hierarchy;
use super::types::parse_timestamp;
use super::DicomDatabase;
use crate::core::config::IndexConfig;
use crate::core::error::{IndexError, Result, StatementContext};
use crate::core::events::IndexEvent;
use crate::core::reader::Dataset;
use crate::core::store::modified;
use crate::core::tag::{attr, tags, Attributes};
use crate::core::tag_cache::{CacheEntry, CachedTag};

/// Per-insert switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOptions {
    /// Copy (or save) the instance into the managed file store
    pub store_file: bool,
    pub generate_thumbnail: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            store_file: true,
            generate_thumbnail: true,
        }
    }
}

impl InsertOptions {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            store_file: config.store_files,
            generate_thumbnail: config.generate_thumbnails,
        }
    }

    /// Index files where they are, no thumbnails (used by schema rebuilds)
    pub fn index_only() -> Self {
        Self {
            store_file: false,
            generate_thumbnail: false,
        }
    }
}

/// What an insert did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Already indexed and the file has not changed since
    Unchanged,
    /// A new Images row was written
    Inserted {
        sop_instance_uid: String,
        filename: String,
        /// An older row for this instance or this file name was replaced
        superseded: bool,
    },
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted { .. })
    }
}

/// Identifying attributes after substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub patient_id: String,
    pub patients_name: String,
    pub study_uid: String,
    pub series_uid: String,
    pub sop_uid: String,
}

impl Identity {
    /// Extract the identity of an instance, filling gaps the way anonymized
    /// data needs
    ///
    /// An empty PatientID takes the StudyInstanceUID, then an empty
    /// PatientsName takes the PatientID.
    pub fn resolve(attributes: &Attributes) -> Result<Self> {
        let study_uid = attr(attributes, tags::STUDY_INSTANCE_UID).to_string();

        let mut patient_id = attr(attributes, tags::PATIENT_ID).to_string();
        if patient_id.is_empty() && !study_uid.is_empty() {
            patient_id = study_uid.clone();
        }
        let mut patients_name = attr(attributes, tags::PATIENT_NAME).to_string();
        if patients_name.is_empty() && !patient_id.is_empty() {
            patients_name = patient_id.clone();
        }

        let identity = Identity {
            patient_id,
            patients_name,
            study_uid,
            series_uid: attr(attributes, tags::SERIES_INSTANCE_UID).to_string(),
            sop_uid: attr(attributes, tags::SOP_INSTANCE_UID).to_string(),
        };

        let missing: Vec<&'static str> = [
            ("PatientsName", &identity.patients_name),
            ("PatientID", &identity.patient_id),
            ("StudyInstanceUID", &identity.study_uid),
            ("SeriesInstanceUID", &identity.series_uid),
            ("SOPInstanceUID", &identity.sop_uid),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(identity)
        } else {
            Err(IndexError::MissingIdentity { missing })
        }
    }
}

#[derive(Debug, Clone)]
struct LastPatient {
    patient_id: String,
    patients_name: String,
    uid: i64,
}

/// Shortcuts carried across consecutive inserts of one import
///
/// Consecutive instances usually share their patient, study and series, so
/// the session remembers the last ones and skips the lookups. Any removal on
/// the database invalidates every session created before it.
#[derive(Debug, Default)]
pub struct IngestSession {
    generation: u64,
    last_patient: Option<LastPatient>,
    last_study: Option<String>,
    last_series: Option<String>,
    inserted: usize,
}

impl IngestSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances inserted through this session
    pub fn inserted(&self) -> usize {
        self.inserted
    }

    pub fn reset(&mut self) {
        self.last_patient = None;
        self.last_study = None;
        self.last_series = None;
    }

    fn sync(&mut self, generation: u64) {
        if self.generation != generation {
            self.reset();
            self.generation = generation;
        }
    }

    fn known_patient(&self, identity: &Identity) -> Option<i64> {
        self.last_patient
            .as_ref()
            .filter(|p| p.patient_id == identity.patient_id && p.patients_name == identity.patients_name)
            .map(|p| p.uid)
    }
}

/// Source of an insert
enum Source<'a> {
    File(&'a Path),
    Dataset(&'a Dataset),
}

impl DicomDatabase {
    /// Index one file with the configured options and a throwaway session
    pub fn insert(&mut self, path: &Path) -> Result<InsertOutcome> {
        let options = InsertOptions::from_config(&self.config);
        self.insert_file(&mut IngestSession::new(), path, options)
    }

    /// Index one file
    pub fn insert_file(
        &mut self,
        session: &mut IngestSession,
        path: &Path,
        options: InsertOptions,
    ) -> Result<InsertOutcome> {
        let result = self.insert_file_inner(session, path, options);
        self.record(result)
    }

    /// Index an already-decoded dataset; its bytes must go to the file store
    pub fn insert_dataset(
        &mut self,
        session: &mut IngestSession,
        dataset: &Dataset,
        options: InsertOptions,
    ) -> Result<InsertOutcome> {
        let result = Identity::resolve(&dataset.attributes).and_then(|identity| {
            self.ingest(session, Source::Dataset(dataset), &dataset.attributes, identity, options)
        });
        self.record(result)
    }

    fn insert_file_inner(
        &mut self,
        session: &mut IngestSession,
        path: &Path,
        options: InsertOptions,
    ) -> Result<InsertOutcome> {
        let path = absolute(path);

        // Cheap path: the file is indexed where it is and has not changed
        if self.file_exists_and_up_to_date(&path.to_string_lossy()) {
            tracing::debug!(path = %path.display(), "file unchanged, skipping");
            return Ok(InsertOutcome::Unchanged);
        }

        let attributes = self.reader.read_attributes(&path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "unreadable file");
            IndexError::UnreadableSource {
                path: path.clone(),
                reason: e.reason,
            }
        })?;
        let identity = Identity::resolve(&attributes)?;
        self.ingest(session, Source::File(&path), &attributes, identity, options)
    }

    fn ingest(
        &mut self,
        session: &mut IngestSession,
        source: Source<'_>,
        attributes: &Attributes,
        identity: Identity,
        options: InsertOptions,
    ) -> Result<InsertOutcome> {
        session.sync(self.generation);

        let store = if options.store_file { self.store.as_ref() } else { None };
        let target: PathBuf = match (&source, store) {
            (_, Some(store)) => store.instance_path(&identity.study_uid, &identity.series_uid, &identity.sop_uid),
            (Source::File(path), None) => path.to_path_buf(),
            (Source::Dataset(_), None) => return Err(IndexError::NoStorageLocation),
        };
        let target_name = target.to_string_lossy().into_owned();

        let existing = Hierarchy::new(&self.conn, self.config.log_sql).image_by_sop(&identity.sop_uid)?;
        if let (Some(existing), Source::File(path)) = (&existing, &source) {
            if existing.filename == target_name && older_than(path, &existing.insert_timestamp) {
                tracing::debug!(sop = %identity.sop_uid, "instance unchanged, skipping");
                return Ok(InsertOutcome::Unchanged);
            }
        }

        // Place the bytes before any row changes
        let filename = match (source, store) {
            (Source::File(path), Some(store)) => {
                store.copy_in(path, &identity.study_uid, &identity.series_uid, &identity.sop_uid)?
            }
            (Source::Dataset(dataset), Some(store)) => {
                store.save(dataset, &identity.study_uid, &identity.series_uid, &identity.sop_uid)?
            }
            (Source::File(path), None) => path.to_path_buf(),
            (Source::Dataset(_), None) => return Err(IndexError::NoStorageLocation),
        };
        let filename = filename.to_string_lossy().into_owned();

        let mut pending = Vec::new();
        let tx = self.conn.transaction().with_sql("BEGIN")?;
        let (displaced, patient_uid, removed_parents) = {
            let hierarchy = Hierarchy::new(&tx, self.config.log_sql);
            if existing.is_some() {
                tracing::debug!(sop = %identity.sop_uid, "superseding indexed instance");
                hierarchy.delete_image(&identity.sop_uid)?;
            }

            // One file holds one instance: newer content takes the file name over
            let displaced = hierarchy.instance_by_filename(&filename)?;
            if let Some(other) = &displaced {
                tracing::warn!(filename = %filename, old = %other, new = %identity.sop_uid, "file now holds another instance, replacing its row");
                hierarchy.delete_image(other)?;
            }

            let patient_uid = match session.known_patient(&identity) {
                Some(uid) => uid,
                None => {
                    let (uid, created) = hierarchy.insert_patient(&identity, attributes)?;
                    if created {
                        pending.push(IndexEvent::PatientAdded {
                            uid,
                            patient_id: identity.patient_id.clone(),
                            patients_name: identity.patients_name.clone(),
                            birth_date: attr(attributes, tags::PATIENT_BIRTH_DATE).to_string(),
                        });
                    }
                    uid
                }
            };

            if session.last_study.as_deref() != Some(identity.study_uid.as_str())
                && hierarchy.insert_study(&identity, attributes, patient_uid)?
            {
                pending.push(IndexEvent::StudyAdded(identity.study_uid.clone()));
            }

            if session.last_series.as_deref() != Some(identity.series_uid.as_str())
                && hierarchy.insert_series(&identity, attributes)?
            {
                pending.push(IndexEvent::SeriesAdded(identity.series_uid.clone()));
            }

            hierarchy.insert_image(&identity.sop_uid, &filename, &identity.series_uid, &now_timestamp())?;
            pending.push(IndexEvent::InstanceAdded(identity.sop_uid.clone()));

            let removed_parents = if existing.is_some() || displaced.is_some() {
                hierarchy.cleanup()?
            } else {
                0
            };

            (displaced, patient_uid, removed_parents)
        };
        tx.commit().with_sql("COMMIT")?;

        if removed_parents > 0 {
            // Parents cached by any session may be gone
            self.generation += 1;
            session.sync(self.generation);
            pending.push(IndexEvent::StructureChanged);
        }

        if let (Some(old), Some(store)) = (&existing, self.store.as_ref()) {
            if old.filename != filename {
                // The old managed copy has no row left to reach it
                store.remove_instance(Path::new(&old.filename), &old.study_uid, &old.series_uid, &identity.sop_uid);
            }
        }

        session.last_patient = Some(LastPatient {
            patient_id: identity.patient_id.clone(),
            patients_name: identity.patients_name.clone(),
            uid: patient_uid,
        });
        session.last_study = Some(identity.study_uid.clone());
        session.last_series = Some(identity.series_uid.clone());
        session.inserted += 1;

        self.precache(&identity.sop_uid, attributes);
        if options.generate_thumbnail {
            self.thumbnail(&identity, Path::new(&filename));
        }

        for event in pending {
            self.events.emit(event);
        }
        if self.is_in_memory() {
            self.events.emit(IndexEvent::DatabaseChanged);
        }

        Ok(InsertOutcome::Inserted {
            sop_instance_uid: identity.sop_uid,
            filename,
            superseded: existing.is_some() || displaced.is_some(),
        })
    }

    /// Warm the tag cache with the configured tags from already-read attributes
    fn precache(&mut self, sop_uid: &str, attributes: &Attributes) {
        if self.config.tags_to_precache.is_empty() {
            return;
        }
        let entries: Vec<CacheEntry> = self
            .config
            .tags_to_precache
            .iter()
            .map(|tag| CacheEntry {
                sop_instance_uid: sop_uid.to_string(),
                tag: *tag,
                value: CachedTag::from_read(attributes.get(tag).map(String::as_str)),
            })
            .collect();
        if let Err(e) = self.tag_cache.store_batch(&entries) {
            tracing::warn!(sop = sop_uid, error = %e, "precache failed");
        }
    }

    fn thumbnail(&self, identity: &Identity, stored: &Path) {
        let (Some(generator), Some(store)) = (&self.thumbnailer, &self.store) else {
            return;
        };
        let destination = store.thumbnail_path(&identity.study_uid, &identity.series_uid, &identity.sop_uid);
        if !store.thumbnail_is_stale(&destination, stored) {
            return;
        }
        if let Some(parent) = destination.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(path = %parent.display(), error = %e, "cannot create thumbnail directory");
                return;
            }
        }
        if let Err(e) = generator.generate(stored, &destination) {
            tracing::warn!(sop = %identity.sop_uid, error = %e, "thumbnail generation failed");
        }
    }

    /// Whether `path` is indexed and unmodified since it was inserted
    pub fn file_exists_and_up_to_date(&self, path: &str) -> bool {
        const SQL: &str = "SELECT InsertTimestamp FROM Images WHERE Filename = ?1";
        let timestamp: Option<String> = match self.conn.prepare_cached(SQL) {
            Ok(mut stmt) => stmt
                .query_row([path], |row| row.get(0))
                .ok(),
            Err(_) => return false,
        };
        match timestamp {
            Some(ts) => older_than(Path::new(path), &ts),
            None => false,
        }
    }
}

/// Whether the file's mtime precedes a stored insert timestamp
fn older_than(path: &Path, timestamp: &str) -> bool {
    match (modified(path), parse_timestamp(timestamp)) {
        (Some(mtime), Some(inserted)) => DateTime::<Utc>::from(mtime) < inserted,
        _ => false,
    }
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
