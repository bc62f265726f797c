//! Collaborator interfaces: dataset parsing and thumbnail generation
//!
//! The index never parses the binary image format itself. It asks a
//! [`DatasetReader`] for the attribute map of a file and, when requested,
//! hands stored files to a [`ThumbnailGenerator`].

use std::io;
use std::path::Path;

use dicom::core::header::Header;
use dicom::core::VR;
use dicom::object::{open_file, DefaultDicomObject};
use thiserror::Error;

use crate::core::tag::{tags, Attributes, Tag};

/// Failure reported by a dataset reader
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ReadError {
    pub reason: String,
}

impl ReadError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure reported by a thumbnail generator
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ThumbnailError {
    pub reason: String,
}

/// Produces the attribute map of an imaging file
pub trait DatasetReader {
    fn read_attributes(&self, path: &Path) -> Result<Attributes, ReadError>;
}

/// Renders a thumbnail of a stored instance to `destination`
pub trait ThumbnailGenerator {
    fn generate(&self, source: &Path, destination: &Path) -> Result<(), ThumbnailError>;
}

/// A dataset that is already decoded in memory
///
/// `encoded` holds the serialized file (preamble and meta group included) and
/// is what gets written to the file store when the dataset is inserted.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub attributes: Attributes,
    pub encoded: Option<Vec<u8>>,
}

impl Dataset {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes,
            encoded: None,
        }
    }

    pub fn with_encoded(mut self, bytes: Vec<u8>) -> Self {
        self.encoded = Some(bytes);
        self
    }

    pub fn sop_instance_uid(&self) -> &str {
        crate::core::tag::attr(&self.attributes, tags::SOP_INSTANCE_UID)
    }

    /// Write the encoded dataset to `path`
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        match &self.encoded {
            Some(bytes) => std::fs::write(path, bytes),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "dataset has no encoded representation",
            )),
        }
    }
}

/// Default reader backed by the `dicom` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomFileReader;

impl DicomFileReader {
    pub fn new() -> Self {
        Self
    }

    /// Flatten the top-level text-representable elements of an object
    pub fn attributes_of(obj: &DefaultDicomObject) -> Attributes {
        let mut attributes = Attributes::new();
        for elem in obj.iter() {
            let header_tag = elem.tag();
            let tag = Tag::new(header_tag.group(), header_tag.element());
            if tag == tags::PIXEL_DATA || is_binary_vr(elem.vr()) {
                continue;
            }
            if let Ok(value) = elem.to_str() {
                attributes.insert(tag, value.trim_end_matches(['\0', ' ']).to_string());
            }
        }
        attributes
    }

    /// Turn a decoded object into a [`Dataset`] that can be inserted
    pub fn dataset_from_object(obj: &DefaultDicomObject) -> Result<Dataset, ReadError> {
        let mut encoded = Vec::new();
        obj.write_all(&mut encoded)
            .map_err(|e| ReadError::new(format!("unable to encode dataset: {}", e)))?;
        Ok(Dataset::new(Self::attributes_of(obj)).with_encoded(encoded))
    }
}

impl DatasetReader for DicomFileReader {
    fn read_attributes(&self, path: &Path) -> Result<Attributes, ReadError> {
        let obj = open_file(path).map_err(|e| ReadError::new(e.to_string()))?;
        Ok(Self::attributes_of(&obj))
    }
}

fn is_binary_vr(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::UN | VR::SQ
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_dataset_save_requires_encoding() {
        let tmp = tempdir().unwrap();
        let dataset = Dataset::new(Attributes::new());
        let err = dataset.save_to(&tmp.path().join("x")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let dataset = dataset.with_encoded(b"DICM".to_vec());
        dataset.save_to(&tmp.path().join("x")).unwrap();
        assert_eq!(std::fs::read(tmp.path().join("x")).unwrap(), b"DICM");
    }

    #[test]
    fn test_dicom_reader_rejects_non_dicom() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "not an image").unwrap();
        assert!(DicomFileReader::new().read_attributes(&path).is_err());
    }
}
