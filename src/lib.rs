//! dicom-index: local DICOM metadata index
//!
//! Indexes imaging files into a Patient / Study / Series / Image hierarchy
//! stored in SQLite, keeps a managed copy of each file, and caches
//! per-instance attribute values so lookups do not re-parse files.

pub mod cli;
pub mod core;
