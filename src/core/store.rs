//! Managed on-disk layout for instance files and thumbnails
//!
//! ```text
//! <databaseDirectory>/dicom/<StudyInstanceUID>/<SeriesInstanceUID>/<SOPInstanceUID>
//! <databaseDirectory>/thumbs/<StudyInstanceUID>/<SeriesInstanceUID>/<SOPInstanceUID>.png
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::error::{IndexError, Result};
use crate::core::reader::Dataset;

const DICOM_DIR: &str = "dicom";
const THUMBS_DIR: &str = "thumbs";

/// Deterministic file placement under a database directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dicom_root(&self) -> PathBuf {
        self.root.join(DICOM_DIR)
    }

    pub fn thumbs_root(&self) -> PathBuf {
        self.root.join(THUMBS_DIR)
    }

    /// Store-relative location of an instance: `<study>/<series>/<sop>`
    pub fn relative_path(study_uid: &str, series_uid: &str, sop_uid: &str) -> PathBuf {
        Path::new(study_uid).join(series_uid).join(sop_uid)
    }

    pub fn instance_path(&self, study_uid: &str, series_uid: &str, sop_uid: &str) -> PathBuf {
        self.dicom_root()
            .join(Self::relative_path(study_uid, series_uid, sop_uid))
    }

    pub fn thumbnail_path(&self, study_uid: &str, series_uid: &str, sop_uid: &str) -> PathBuf {
        self.thumbs_root()
            .join(study_uid)
            .join(series_uid)
            .join(format!("{}.png", sop_uid))
    }

    /// Copy a source file to its canonical location, returning that location
    pub fn copy_in(
        &self,
        source: &Path,
        study_uid: &str,
        series_uid: &str,
        sop_uid: &str,
    ) -> Result<PathBuf> {
        let destination = self.prepare(study_uid, series_uid, sop_uid)?;
        if source != destination {
            tracing::debug!(from = %source.display(), to = %destination.display(), "copy file");
            fs::copy(source, &destination).map_err(|source| IndexError::Write {
                path: destination.clone(),
                source,
            })?;
        }
        Ok(destination)
    }

    /// Serialize an in-memory dataset to its canonical location
    pub fn save(
        &self,
        dataset: &Dataset,
        study_uid: &str,
        series_uid: &str,
        sop_uid: &str,
    ) -> Result<PathBuf> {
        let destination = self.prepare(study_uid, series_uid, sop_uid)?;
        tracing::debug!(to = %destination.display(), "saving dataset");
        dataset
            .save_to(&destination)
            .map_err(|source| IndexError::Write {
                path: destination.clone(),
                source,
            })?;
        Ok(destination)
    }

    fn prepare(&self, study_uid: &str, series_uid: &str, sop_uid: &str) -> Result<PathBuf> {
        let destination = self.instance_path(study_uid, series_uid, sop_uid);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|source| IndexError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(destination)
    }

    /// Whether a stored path is a managed copy of exactly this instance
    pub fn is_managed_copy(
        &self,
        stored: &Path,
        study_uid: &str,
        series_uid: &str,
        sop_uid: &str,
    ) -> ManagedFile {
        if !stored.starts_with(self.dicom_root()) {
            return ManagedFile::External;
        }
        if stored.ends_with(Self::relative_path(study_uid, series_uid, sop_uid)) {
            ManagedFile::Owned
        } else {
            ManagedFile::Inconsistent
        }
    }

    /// Delete the stored file (when managed) and thumbnail of a removed instance
    pub fn remove_instance(&self, stored: &Path, study_uid: &str, series_uid: &str, sop_uid: &str) {
        match self.is_managed_copy(stored, study_uid, series_uid, sop_uid) {
            ManagedFile::Owned => remove_logged(stored, "file"),
            ManagedFile::Inconsistent => {
                tracing::error!(
                    path = %stored.display(),
                    sop_uid,
                    "database inconsistency detected during delete, keeping file"
                );
            }
            ManagedFile::External => {}
        }
        remove_logged(
            &self.thumbnail_path(study_uid, series_uid, sop_uid),
            "thumbnail",
        );
    }

    /// True when the thumbnail is missing or older than its source
    pub fn thumbnail_is_stale(&self, thumbnail: &Path, source: &Path) -> bool {
        match (modified(thumbnail), modified(source)) {
            (Some(thumb), Some(src)) => thumb <= src,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Ownership of a path recorded in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedFile {
    /// Copied into the store, deleted along with its row
    Owned,
    /// Below the store root but not where the row says it should be
    Inconsistent,
    /// Indexed in place, never deleted by the index
    External,
}

fn remove_logged(path: &Path, what: &str) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed {}", what),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove {}", what),
    }
}

/// Modification time of a file, if it exists
pub fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout() {
        let store = FileStore::new("/data/db");
        assert_eq!(
            store.instance_path("1.2", "1.2.3", "1.2.3.4"),
            PathBuf::from("/data/db/dicom/1.2/1.2.3/1.2.3.4")
        );
        assert_eq!(
            store.thumbnail_path("1.2", "1.2.3", "1.2.3.4"),
            PathBuf::from("/data/db/thumbs/1.2/1.2.3/1.2.3.4.png")
        );
    }

    #[test]
    fn test_copy_in_creates_directories() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("in.dcm");
        fs::write(&source, b"payload").unwrap();

        let store = FileStore::new(tmp.path().join("db"));
        let stored = store.copy_in(&source, "S", "SE", "I").unwrap();

        assert_eq!(stored, store.instance_path("S", "SE", "I"));
        assert_eq!(fs::read(&stored).unwrap(), b"payload");
        assert!(source.exists());
    }

    #[test]
    fn test_copy_in_missing_source_is_write_failure() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        let err = store
            .copy_in(&tmp.path().join("missing"), "S", "SE", "I")
            .unwrap_err();
        assert!(matches!(err, IndexError::Write { .. }));
    }

    #[test]
    fn test_remove_only_deletes_managed_copies() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path());

        let external = tmp.path().join("outside.dcm");
        fs::write(&external, b"x").unwrap();
        store.remove_instance(&external, "S", "SE", "I");
        assert!(external.exists());

        let misplaced = store.instance_path("S", "SE", "OTHER");
        fs::create_dir_all(misplaced.parent().unwrap()).unwrap();
        fs::write(&misplaced, b"x").unwrap();
        store.remove_instance(&misplaced, "S", "SE", "I");
        assert!(misplaced.exists());

        let owned = store.instance_path("S", "SE", "I");
        fs::write(&owned, b"x").unwrap();
        let thumb = store.thumbnail_path("S", "SE", "I");
        fs::create_dir_all(thumb.parent().unwrap()).unwrap();
        fs::write(&thumb, b"png").unwrap();
        store.remove_instance(&owned, "S", "SE", "I");
        assert!(!owned.exists());
        assert!(!thumb.exists());
    }

    #[test]
    fn test_thumbnail_staleness() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        let source = tmp.path().join("src");
        let thumb = tmp.path().join("thumb.png");
        fs::write(&source, b"x").unwrap();
        assert!(store.thumbnail_is_stale(&thumb, &source));

        fs::write(&thumb, b"png").unwrap();
        let older = SystemTime::now() - std::time::Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(older)
            .unwrap();
        assert!(!store.thumbnail_is_stale(&thumb, &source));
    }
}
