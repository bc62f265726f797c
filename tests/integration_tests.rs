//! Integration tests for the dicom-index CLI
//!
//! These tests exercise the CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::{tags, uids};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STUDY: &str = "1.2.826.0.1.3680043.2.1125.1";
const SERIES_A: &str = "1.2.826.0.1.3680043.2.1125.1.1";
const SERIES_B: &str = "1.2.826.0.1.3680043.2.1125.1.2";

/// Test workspace: an input directory and an index location
struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("input")).unwrap();
        Self { tmp }
    }

    fn input(&self) -> PathBuf {
        self.tmp.path().join("input")
    }

    fn db(&self) -> PathBuf {
        self.tmp.path().join("db").join("index.sqlite")
    }

    /// A dicom-index command bound to this workspace's index
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("dicom-index").unwrap();
        cmd.arg("--db")
            .arg(self.db())
            .env("HOME", self.tmp.path())
            .env("XDG_CONFIG_HOME", self.tmp.path().join("config"))
            .env_remove("DICOM_INDEX_PRECACHE")
            .env_remove("DICOM_INDEX_STORE_FILES")
            .env_remove("DICOM_INDEX_THUMBNAILS")
            .env_remove("DICOM_INDEX_LOG");
        cmd
    }

    fn import(&self) {
        self.cmd().arg("import").arg(self.input()).assert().success();
    }
}

/// Write a minimal CT instance to `path`
fn write_instance(path: &Path, series_uid: &str, sop_uid: &str, series_description: &str) {
    let obj = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::CT_IMAGE_STORAGE)),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid)),
        DataElement::new(tags::STUDY_DATE, VR::DA, PrimitiveValue::from("20240131")),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
        DataElement::new(tags::STUDY_DESCRIPTION, VR::LO, PrimitiveValue::from("Head")),
        DataElement::new(tags::SERIES_DESCRIPTION, VR::LO, PrimitiveValue::from(series_description)),
        DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("Doe^Jane")),
        DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("P-001")),
        DataElement::new(tags::PATIENT_SEX, VR::CS, PrimitiveValue::from("F")),
        DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(STUDY)),
        DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_uid)),
        DataElement::new(tags::SERIES_NUMBER, VR::IS, PrimitiveValue::from("3")),
    ]);
    let file = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(sop_uid)
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
        )
        .unwrap();
    file.write_to_file(path).unwrap();
}

/// Two series of one study: two instances in A, one in B
fn populate(ws: &Workspace) {
    let input = ws.input();
    write_instance(&input.join("a1.dcm"), SERIES_A, "1.2.3.1", "Axial");
    write_instance(&input.join("a2.dcm"), SERIES_A, "1.2.3.2", "Axial");
    fs::create_dir_all(input.join("nested")).unwrap();
    write_instance(&input.join("nested").join("b1.dcm"), SERIES_B, "1.2.3.3", "Coronal");
}

// ============================================================================
// CLI Basic Tests
// ============================================================================

#[test]
fn test_help_displays() {
    Command::cargo_bin("dicom-index")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("schema"));
}

#[test]
fn test_invalid_tag_rejected() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["tag", "1.2.3", "not-a-tag"])
        .assert()
        .failure();
}

// ============================================================================
// Import Tests
// ============================================================================

#[test]
fn test_import_directory() {
    let ws = Workspace::new();
    populate(&ws);

    ws.cmd()
        .arg("import")
        .arg(ws.input())
        .assert()
        .success()
        .stdout(predicate::str::contains("Indexed 3 of 3 file(s)"));

    assert!(ws.db().exists());
    assert!(ws.db().with_file_name("dicom-tag-cache.sqlite").exists());
}

#[test]
fn test_reimport_is_unchanged() {
    let ws = Workspace::new();
    populate(&ws);
    ws.import();

    ws.cmd()
        .arg("import")
        .arg(ws.input())
        .assert()
        .success()
        .stdout(predicate::str::contains("Indexed 0 of 3 file(s)"))
        .stdout(predicate::str::contains("Unchanged: 3"));
}

#[test]
fn test_import_reports_unreadable_files() {
    let ws = Workspace::new();
    populate(&ws);
    fs::write(ws.input().join("notes.txt"), "not an image").unwrap();

    ws.cmd()
        .arg("import")
        .arg(ws.input())
        .assert()
        .success()
        .stdout(predicate::str::contains("Indexed 3 of 4 file(s)"))
        .stdout(predicate::str::contains("Failed:    1"))
        .stderr(predicate::str::contains("notes.txt"));
}

#[test]
fn test_import_fail_fast() {
    let ws = Workspace::new();
    fs::write(ws.input().join("notes.txt"), "not an image").unwrap();

    ws.cmd()
        .arg("import")
        .arg("--fail-fast")
        .arg(ws.input())
        .assert()
        .failure()
        .stderr(predicate::str::contains("import stopped"));
}

#[test]
fn test_import_missing_path() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("import")
        .arg(ws.input().join("nowhere"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such file or directory"));
}

#[test]
fn test_import_without_store_keeps_source_paths() {
    let ws = Workspace::new();
    populate(&ws);
    ws.cmd()
        .arg("import")
        .arg("--no-store")
        .arg(ws.input())
        .assert()
        .success();

    let output = ws
        .cmd()
        .args(["ls", "instances", SERIES_B, "--format", "tsv"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("b1.dcm"));
    assert!(stdout.contains("input"));
}

// ============================================================================
// Navigation Tests
// ============================================================================

#[test]
fn test_ls_patients_json() {
    let ws = Workspace::new();
    populate(&ws);
    ws.import();

    let output = ws
        .cmd()
        .args(["ls", "patients", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let patients: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let patients = patients.as_array().unwrap();
    assert_eq!(patients.len(), 1);
    assert_eq!(patients[0]["patients_name"], "Doe^Jane");
    assert_eq!(patients[0]["patient_id"], "P-001");
}

#[test]
fn test_ls_series_ids() {
    let ws = Workspace::new();
    populate(&ws);
    ws.import();

    ws.cmd()
        .args(["ls", "series", STUDY, "--format", "id"])
        .assert()
        .success()
        .stdout(predicate::str::contains(SERIES_A))
        .stdout(predicate::str::contains(SERIES_B));
}

#[test]
fn test_ls_studies_table() {
    let ws = Workspace::new();
    populate(&ws);
    ws.import();

    ws.cmd()
        .args(["ls", "studies", "--format", "md"])
        .assert()
        .success()
        .stdout(predicate::str::contains(STUDY))
        .stdout(predicate::str::contains("2024-01-31"));
}

#[test]
fn test_ls_empty_index() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["ls", "patients"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No patients found"));
}

// ============================================================================
// Tag Tests
// ============================================================================

#[test]
fn test_tag_value_lookup() {
    let ws = Workspace::new();
    populate(&ws);
    ws.import();

    ws.cmd()
        .args(["tag", "1.2.3.3", "0008,103e", "--format", "id"])
        .assert()
        .success()
        .stdout("Coronal\n");

    // A missing attribute prints an empty value
    ws.cmd()
        .args(["tag", "1.2.3.3", "0018,0050"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(0018,0050) \n"));
}

#[test]
fn test_tag_full_header_json() {
    let ws = Workspace::new();
    populate(&ws);
    ws.import();

    let output = ws
        .cmd()
        .args(["tag", "1.2.3.1", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let header: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(header["0010,0020"], "P-001");
    assert_eq!(header["0020,000d"], STUDY);
}

#[test]
fn test_tag_unknown_instance() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["tag", "9.9.9", "0010,0010"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Instance not indexed"));
}

// ============================================================================
// Removal Tests
// ============================================================================

#[test]
fn test_remove_series_cascades() {
    let ws = Workspace::new();
    populate(&ws);
    ws.import();

    ws.cmd()
        .args(["remove", "series", SERIES_A])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 2 instance(s) for series"));

    ws.cmd()
        .args(["ls", "series", "--format", "id"])
        .assert()
        .success()
        .stdout(predicate::str::contains(SERIES_B))
        .stdout(predicate::str::contains(SERIES_A).not());

    ws.cmd()
        .args(["remove", "series", SERIES_B])
        .assert()
        .success();

    // Removing the last series empties the study and the patient
    ws.cmd()
        .args(["ls", "patients"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No patients found"));
}

#[test]
fn test_remove_unknown_instance() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["remove", "instance", "9.9.9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nothing indexed for that instance"));
}

// ============================================================================
// Schema and Cache Tests
// ============================================================================

#[test]
fn test_schema_status_up_to_date() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["schema", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Up to date"));

    ws.cmd()
        .args(["schema", "update"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Schema is up to date"));
}

#[test]
fn test_schema_forced_update_reindexes() {
    let ws = Workspace::new();
    populate(&ws);
    ws.import();

    ws.cmd()
        .args(["schema", "update", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 of 3 file(s) re-indexed"));

    ws.cmd()
        .args(["ls", "instances", SERIES_A, "--format", "id"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1.2.3.1"))
        .stdout(predicate::str::contains("1.2.3.2"));
}

#[test]
fn test_cache_status_and_clear() {
    let ws = Workspace::new();
    populate(&ws);
    ws.import();
    ws.cmd()
        .args(["tag", "1.2.3.1", "0010,0010", "0008,0060"])
        .assert()
        .success();

    let output = ws
        .cmd()
        .args(["cache", "status", "--format", "json"])
        .output()
        .unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["images"], 3);
    assert_eq!(stats["cached_tags"], 2);

    ws.cmd()
        .args(["cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 2 cached value(s)"));

    let output = ws
        .cmd()
        .args(["cache", "status", "--format", "json"])
        .output()
        .unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["cached_tags"], 0);
}

#[test]
fn test_import_precache_warms_cache() {
    let ws = Workspace::new();
    populate(&ws);
    ws.cmd()
        .args(["import", "--precache", "0010,0010"])
        .arg(ws.input())
        .assert()
        .success();

    let output = ws
        .cmd()
        .args(["cache", "status", "--format", "json"])
        .output()
        .unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["cached_tags"], 3);
}
