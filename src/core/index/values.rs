//! Attribute lookups backed by the tag cache
//!
//! A hit answers without touching the file. A miss reads the file once
//! through the dataset reader and writes the answer back, including the
//! fact that the tag is absent.

use std::path::Path;

use super::DicomDatabase;
use crate::core::tag::{Attributes, Tag};
use crate::core::tag_cache::CachedTag;

impl DicomDatabase {
    /// Value of `tag` in an indexed instance ("" when absent or unknown)
    pub fn instance_value(&mut self, sop_uid: &str, tag: Tag) -> String {
        if let Some(hit) = self.tag_cache.lookup(sop_uid, tag) {
            return hit.as_str().to_string();
        }
        match self.file_for_instance(sop_uid) {
            Some(filename) => self.read_and_cache(sop_uid, &filename, tag),
            None => String::new(),
        }
    }

    /// Value of `tag` in a file; cached when the file is indexed
    pub fn file_value(&mut self, filename: &str, tag: Tag) -> String {
        match self.instance_for_file(filename) {
            Some(sop_uid) => {
                if let Some(hit) = self.tag_cache.lookup(&sop_uid, tag) {
                    return hit.as_str().to_string();
                }
                self.read_and_cache(&sop_uid, filename, tag)
            }
            None => self
                .file_header(filename)
                .remove(&tag)
                .unwrap_or_default(),
        }
    }

    /// Every readable attribute of a file (empty when unreadable)
    pub fn file_header(&self, filename: &str) -> Attributes {
        match self.reader.read_attributes(Path::new(filename)) {
            Ok(attributes) => attributes,
            Err(e) => {
                tracing::warn!(file = filename, error = %e, "cannot read header");
                Attributes::new()
            }
        }
    }

    /// Every readable attribute of an indexed instance
    pub fn instance_header(&self, sop_uid: &str) -> Attributes {
        self.file_for_instance(sop_uid)
            .map(|filename| self.file_header(&filename))
            .unwrap_or_default()
    }

    fn read_and_cache(&mut self, sop_uid: &str, filename: &str, tag: Tag) -> String {
        let value = match self.reader.read_attributes(Path::new(filename)) {
            Ok(attributes) => CachedTag::from_read(attributes.get(&tag).map(String::as_str)),
            Err(e) => {
                // Unreadable files are remembered as lacking the tag
                tracing::warn!(file = filename, error = %e, "cannot read tag from file");
                CachedTag::NotPresent
            }
        };
        if let Err(e) = self.tag_cache.store(sop_uid, tag, &value) {
            tracing::warn!(sop = sop_uid, %tag, error = %e, "cannot cache tag");
        }
        value.as_str().to_string()
    }
}
