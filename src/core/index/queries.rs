//! Hierarchy navigation
//!
//! Lookups never fail: nothing found and a failed statement both come back
//! as an empty list or `None` (failures are logged).

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Params, Row};

use super::hierarchy::Hierarchy;
use super::types::{
    parse_timestamp, FileDescriptions, ImageRecord, IndexStats, PatientRecord, SeriesRecord,
    StudyRecord,
};
use super::DicomDatabase;

impl DicomDatabase {
    /// Collect the first column of every row
    fn column<T, P>(&self, sql: &str, params: P) -> Vec<T>
    where
        T: rusqlite::types::FromSql,
        P: Params,
    {
        self.rows(sql, params, |row| row.get(0))
    }

    fn rows<T, P, F>(&self, sql: &str, params: P, map: F) -> Vec<T>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = match self.conn.prepare_cached(sql) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(sql, error = %e, "SQL failed");
                return vec![];
            }
        };

        let rows = match stmt.query_map(params, map) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(sql, error = %e, "SQL failed");
                return vec![];
            }
        };

        rows.filter_map(|r| r.ok()).collect()
    }

    fn row<T, P, F>(&self, sql: &str, params: P, map: F) -> Option<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = match self.conn.prepare_cached(sql) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(sql, error = %e, "SQL failed");
                return None;
            }
        };
        match stmt.query_row(params, map).optional() {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(sql, error = %e, "SQL failed");
                None
            }
        }
    }

    // =====================================================================
    // Existence
    // =====================================================================

    pub fn patient_exists(&self, patient_id: &str, patients_name: &str) -> bool {
        Hierarchy::new(&self.conn, false)
            .patient_uid(patient_id, patients_name)
            .map(|uid| uid.is_some())
            .unwrap_or(false)
    }

    pub fn study_exists(&self, study_uid: &str) -> bool {
        Hierarchy::new(&self.conn, false)
            .study_exists(study_uid)
            .unwrap_or(false)
    }

    pub fn series_exists(&self, series_uid: &str) -> bool {
        Hierarchy::new(&self.conn, false)
            .series_exists(series_uid)
            .unwrap_or(false)
    }

    pub fn image_exists_by_filename(&self, filename: &str) -> bool {
        Hierarchy::new(&self.conn, false)
            .image_exists_by_filename(filename)
            .unwrap_or(false)
    }

    pub fn image_exists_by_sop(&self, sop_uid: &str) -> bool {
        Hierarchy::new(&self.conn, false)
            .image_by_sop(sop_uid)
            .map(|image| image.is_some())
            .unwrap_or(false)
    }

    // =====================================================================
    // Downward navigation
    // =====================================================================

    /// Surrogate ids of all patients
    pub fn patients(&self) -> Vec<i64> {
        self.column("SELECT UID FROM Patients ORDER BY UID", [])
    }

    pub fn studies_for_patient(&self, patient_uid: i64) -> Vec<String> {
        self.column(
            "SELECT StudyInstanceUID FROM Studies WHERE PatientsUID = ?1 ORDER BY StudyDate, StudyInstanceUID",
            params![patient_uid],
        )
    }

    pub fn series_for_study(&self, study_uid: &str) -> Vec<String> {
        self.column(
            "SELECT SeriesInstanceUID FROM Series WHERE StudyInstanceUID = ?1 ORDER BY SeriesNumber, SeriesInstanceUID",
            params![study_uid],
        )
    }

    pub fn files_for_series(&self, series_uid: &str) -> Vec<String> {
        self.column(
            "SELECT Filename FROM Images WHERE SeriesInstanceUID = ?1 ORDER BY Filename",
            params![series_uid],
        )
    }

    /// Every SOPInstanceUID of a series
    pub fn instances_for_series(&self, series_uid: &str) -> Vec<String> {
        self.column(
            "SELECT SOPInstanceUID FROM Images WHERE SeriesInstanceUID = ?1 ORDER BY SOPInstanceUID",
            params![series_uid],
        )
    }

    pub fn images_for_series(&self, series_uid: &str) -> Vec<ImageRecord> {
        self.rows(
            "SELECT SOPInstanceUID, Filename, SeriesInstanceUID, InsertTimestamp FROM Images WHERE SeriesInstanceUID = ?1 ORDER BY SOPInstanceUID",
            params![series_uid],
            image_record,
        )
    }

    pub fn all_files(&self) -> Vec<String> {
        self.column("SELECT Filename FROM Images ORDER BY Filename", [])
    }

    // =====================================================================
    // Upward navigation
    // =====================================================================

    pub fn series_for_file(&self, filename: &str) -> Option<String> {
        self.row(
            "SELECT SeriesInstanceUID FROM Images WHERE Filename = ?1",
            params![filename],
            |row| row.get(0),
        )
    }

    pub fn study_for_series(&self, series_uid: &str) -> Option<String> {
        self.row(
            "SELECT StudyInstanceUID FROM Series WHERE SeriesInstanceUID = ?1",
            params![series_uid],
            |row| row.get(0),
        )
    }

    pub fn patient_for_study(&self, study_uid: &str) -> Option<i64> {
        self.row(
            "SELECT PatientsUID FROM Studies WHERE StudyInstanceUID = ?1",
            params![study_uid],
            |row| row.get(0),
        )
    }

    pub fn file_for_instance(&self, sop_uid: &str) -> Option<String> {
        self.row(
            "SELECT Filename FROM Images WHERE SOPInstanceUID = ?1",
            params![sop_uid],
            |row| row.get(0),
        )
    }

    pub fn instance_for_file(&self, filename: &str) -> Option<String> {
        self.row(
            "SELECT SOPInstanceUID FROM Images WHERE Filename = ?1",
            params![filename],
            |row| row.get(0),
        )
    }

    pub fn insert_timestamp_for_instance(&self, sop_uid: &str) -> Option<DateTime<Utc>> {
        self.row(
            "SELECT InsertTimestamp FROM Images WHERE SOPInstanceUID = ?1",
            params![sop_uid],
            |row| row.get::<_, String>(0),
        )
        .and_then(|ts| parse_timestamp(&ts))
    }

    // =====================================================================
    // Descriptions
    // =====================================================================

    pub fn description_for_series(&self, series_uid: &str) -> Option<String> {
        self.row(
            "SELECT SeriesDescription FROM Series WHERE SeriesInstanceUID = ?1",
            params![series_uid],
            |row| row.get::<_, Option<String>>(0),
        )
        .flatten()
    }

    pub fn description_for_study(&self, study_uid: &str) -> Option<String> {
        self.row(
            "SELECT StudyDescription FROM Studies WHERE StudyInstanceUID = ?1",
            params![study_uid],
            |row| row.get::<_, Option<String>>(0),
        )
        .flatten()
    }

    pub fn name_for_patient(&self, patient_uid: i64) -> Option<String> {
        self.row(
            "SELECT PatientsName FROM Patients WHERE UID = ?1",
            params![patient_uid],
            |row| row.get::<_, Option<String>>(0),
        )
        .flatten()
    }

    /// Series, study and patient labels of an indexed file in one query
    pub fn descriptions_for_file(&self, filename: &str) -> Option<FileDescriptions> {
        self.row(
            r#"SELECT Series.SeriesDescription, Studies.StudyDescription, Patients.PatientsName
               FROM Images
               JOIN Series ON Series.SeriesInstanceUID = Images.SeriesInstanceUID
               JOIN Studies ON Studies.StudyInstanceUID = Series.StudyInstanceUID
               JOIN Patients ON Patients.UID = Studies.PatientsUID
               WHERE Images.Filename = ?1"#,
            params![filename],
            |row| {
                Ok(FileDescriptions {
                    series_description: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    study_description: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    patients_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            },
        )
    }

    // =====================================================================
    // Records
    // =====================================================================

    pub fn patient_record(&self, patient_uid: i64) -> Option<PatientRecord> {
        self.row(
            "SELECT UID, PatientsName, PatientID, PatientsBirthDate, PatientsBirthTime, PatientsSex, PatientsAge, PatientsComments FROM Patients WHERE UID = ?1",
            params![patient_uid],
            |row| {
                Ok(PatientRecord {
                    uid: row.get(0)?,
                    patients_name: text(row, 1)?,
                    patient_id: text(row, 2)?,
                    birth_date: text(row, 3)?,
                    birth_time: text(row, 4)?,
                    sex: text(row, 5)?,
                    age: text(row, 6)?,
                    comments: text(row, 7)?,
                })
            },
        )
    }

    pub fn study_record(&self, study_uid: &str) -> Option<StudyRecord> {
        self.row(
            "SELECT StudyInstanceUID, PatientsUID, StudyID, StudyDate, StudyTime, AccessionNumber, ModalitiesInStudy, InstitutionName, ReferringPhysician, PerformingPhysiciansName, StudyDescription FROM Studies WHERE StudyInstanceUID = ?1",
            params![study_uid],
            |row| {
                Ok(StudyRecord {
                    study_instance_uid: row.get(0)?,
                    patients_uid: row.get(1)?,
                    study_id: text(row, 2)?,
                    study_date: text(row, 3)?,
                    study_time: text(row, 4)?,
                    accession_number: text(row, 5)?,
                    modalities_in_study: text(row, 6)?,
                    institution_name: text(row, 7)?,
                    referring_physician: text(row, 8)?,
                    performing_physicians_name: text(row, 9)?,
                    study_description: text(row, 10)?,
                })
            },
        )
    }

    pub fn series_record(&self, series_uid: &str) -> Option<SeriesRecord> {
        self.row(
            "SELECT SeriesInstanceUID, StudyInstanceUID, SeriesNumber, SeriesDate, SeriesTime, SeriesDescription, Modality, BodyPartExamined, FrameOfReferenceUID, AcquisitionNumber, ContrastAgent, ScanningSequence, EchoNumber, TemporalPosition FROM Series WHERE SeriesInstanceUID = ?1",
            params![series_uid],
            |row| {
                Ok(SeriesRecord {
                    series_instance_uid: row.get(0)?,
                    study_instance_uid: row.get(1)?,
                    series_number: number(row, 2)?,
                    series_date: text(row, 3)?,
                    series_time: text(row, 4)?,
                    series_description: text(row, 5)?,
                    modality: text(row, 6)?,
                    body_part_examined: text(row, 7)?,
                    frame_of_reference_uid: text(row, 8)?,
                    acquisition_number: number(row, 9)?,
                    contrast_agent: text(row, 10)?,
                    scanning_sequence: text(row, 11)?,
                    echo_number: number(row, 12)?,
                    temporal_position: number(row, 13)?,
                })
            },
        )
    }

    pub fn image_record(&self, sop_uid: &str) -> Option<ImageRecord> {
        self.row(
            "SELECT SOPInstanceUID, Filename, SeriesInstanceUID, InsertTimestamp FROM Images WHERE SOPInstanceUID = ?1",
            params![sop_uid],
            image_record,
        )
    }

    /// Row counts of every table, including the tag cache
    pub fn statistics(&mut self) -> IndexStats {
        let count = |table: &str| -> usize {
            self.row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap_or(0) as usize
        };

        let mut stats = IndexStats {
            patients: count("Patients"),
            studies: count("Studies"),
            series: count("Series"),
            images: count("Images"),
            cached_tags: 0,
        };
        stats.cached_tags = self.tag_cache.entry_count();
        stats
    }
}

fn image_record(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        sop_instance_uid: row.get(0)?,
        filename: row.get(1)?,
        series_instance_uid: row.get(2)?,
        insert_timestamp: parse_timestamp(&row.get::<_, String>(3)?),
    })
}

fn text(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

fn number(row: &Row<'_>, idx: usize) -> rusqlite::Result<i64> {
    Ok(row.get::<_, Option<i64>>(idx)?.unwrap_or(0))
}
