//! Attribute tags and attribute maps
//!
//! A tag is a (group, element) pair. Its canonical text form is
//! `gggg,eeee` in lowercase hex, which is also the key used by the tag cache.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A (group, element) attribute identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }

    /// Parse a `gggg,eeee` string (surrounding parentheses and whitespace allowed)
    pub fn parse(s: &str) -> Result<Self, TagParseError> {
        s.parse()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x},{:04x}", self.group, self.element)
    }
}

impl FromStr for Tag {
    type Err = TagParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .trim();

        let (group, element) = trimmed
            .split_once(',')
            .ok_or_else(|| TagParseError::MissingComma(s.to_string()))?;

        let parse_part = |part: &str| {
            let part = part.trim();
            if part.is_empty() || part.len() > 4 {
                return Err(TagParseError::InvalidHex(s.to_string()));
            }
            u16::from_str_radix(part, 16).map_err(|_| TagParseError::InvalidHex(s.to_string()))
        };

        Ok(Tag::new(parse_part(group)?, parse_part(element)?))
    }
}

impl Serialize for Tag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing tags
#[derive(Debug, Error)]
pub enum TagParseError {
    #[error("missing ',' between group and element in tag '{0}'")]
    MissingComma(String),

    #[error("invalid hex group/element in tag '{0}' (expected gggg,eeee)")]
    InvalidHex(String),
}

/// Attribute values of one instance, keyed by tag
pub type Attributes = BTreeMap<Tag, String>;

/// Well-known tags used to build the Patient/Study/Series/Image hierarchy
pub mod tags {
    use super::Tag;

    // Patient
    pub const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);
    pub const PATIENT_ID: Tag = Tag::new(0x0010, 0x0020);
    pub const PATIENT_BIRTH_DATE: Tag = Tag::new(0x0010, 0x0030);
    pub const PATIENT_BIRTH_TIME: Tag = Tag::new(0x0010, 0x0032);
    pub const PATIENT_SEX: Tag = Tag::new(0x0010, 0x0040);
    pub const PATIENT_AGE: Tag = Tag::new(0x0010, 0x1010);
    pub const PATIENT_COMMENTS: Tag = Tag::new(0x0010, 0x4000);

    // Study
    pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000d);
    pub const STUDY_ID: Tag = Tag::new(0x0020, 0x0010);
    pub const STUDY_DATE: Tag = Tag::new(0x0008, 0x0020);
    pub const STUDY_TIME: Tag = Tag::new(0x0008, 0x0030);
    pub const ACCESSION_NUMBER: Tag = Tag::new(0x0008, 0x0050);
    pub const MODALITIES_IN_STUDY: Tag = Tag::new(0x0008, 0x0061);
    pub const INSTITUTION_NAME: Tag = Tag::new(0x0008, 0x0080);
    pub const REFERRING_PHYSICIAN_NAME: Tag = Tag::new(0x0008, 0x0090);
    pub const PERFORMING_PHYSICIAN_NAME: Tag = Tag::new(0x0008, 0x1050);
    pub const STUDY_DESCRIPTION: Tag = Tag::new(0x0008, 0x1030);

    // Series
    pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000e);
    pub const SERIES_NUMBER: Tag = Tag::new(0x0020, 0x0011);
    pub const SERIES_DATE: Tag = Tag::new(0x0008, 0x0021);
    pub const SERIES_TIME: Tag = Tag::new(0x0008, 0x0031);
    pub const SERIES_DESCRIPTION: Tag = Tag::new(0x0008, 0x103e);
    pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
    pub const BODY_PART_EXAMINED: Tag = Tag::new(0x0018, 0x0015);
    pub const FRAME_OF_REFERENCE_UID: Tag = Tag::new(0x0020, 0x0052);
    pub const ACQUISITION_NUMBER: Tag = Tag::new(0x0020, 0x0012);
    pub const CONTRAST_BOLUS_AGENT: Tag = Tag::new(0x0018, 0x0010);
    pub const SCANNING_SEQUENCE: Tag = Tag::new(0x0018, 0x0020);
    pub const ECHO_NUMBERS: Tag = Tag::new(0x0018, 0x0086);
    pub const TEMPORAL_POSITION_IDENTIFIER: Tag = Tag::new(0x0020, 0x0100);

    // Instance
    pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
    pub const PIXEL_DATA: Tag = Tag::new(0x7fe0, 0x0010);
}

/// Get an attribute as a trimmed string, empty if absent
pub fn attr<'a>(attributes: &'a Attributes, tag: Tag) -> &'a str {
    attributes.get(&tag).map(|v| v.trim()).unwrap_or("")
}

/// Get an attribute as an integer, 0 if absent or not numeric
pub fn attr_int(attributes: &Attributes, tag: Tag) -> i64 {
    let value = attr(attributes, tag);
    // Multi-valued integer strings keep only the first value
    let first = value.split('\\').next().unwrap_or("").trim();
    first
        .parse::<i64>()
        .or_else(|_| first.parse::<f64>().map(|f| f as i64))
        .unwrap_or(0)
}
