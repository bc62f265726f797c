//! Patient / Study / Series / Image rows and their integrity rules
//!
//! [`Hierarchy`] wraps a borrowed connection (or an open transaction) and
//! offers the existence predicates and upserts used by ingestion. The
//! cascade removal operations live on [`DicomDatabase`] at the bottom of this
//! file because they also touch the file store.

use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Params};

use super::ingest::Identity;
use super::DicomDatabase;
use crate::core::error::{Result, StatementContext};
use crate::core::events::IndexEvent;
use crate::core::tag::{attr, attr_int, tags, Attributes};

const CLEANUP_SERIES: &str = "DELETE FROM Series WHERE (SELECT COUNT(*) FROM Images WHERE Images.SeriesInstanceUID = Series.SeriesInstanceUID) = 0";
const CLEANUP_STUDIES: &str = "DELETE FROM Studies WHERE (SELECT COUNT(*) FROM Series WHERE Series.StudyInstanceUID = Studies.StudyInstanceUID) = 0";
const CLEANUP_PATIENTS: &str = "DELETE FROM Patients WHERE (SELECT COUNT(*) FROM Studies WHERE Studies.PatientsUID = Patients.UID) = 0";

/// Row-level access to the hierarchy tables
pub(crate) struct Hierarchy<'c> {
    conn: &'c Connection,
    log_sql: bool,
}

/// The Images row of an instance as seen by the dedup check
#[derive(Debug, Clone)]
pub(crate) struct StoredImage {
    pub filename: String,
    pub insert_timestamp: String,
    pub series_uid: String,
    /// Empty when the parent series row is missing
    pub study_uid: String,
}

impl<'c> Hierarchy<'c> {
    pub fn new(conn: &'c Connection, log_sql: bool) -> Self {
        Self { conn, log_sql }
    }

    fn exec<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        if self.log_sql {
            tracing::debug!(sql, "exec");
        }
        let mut stmt = self.conn.prepare_cached(sql).with_sql(sql)?;
        stmt.execute(params).with_sql(sql)
    }

    fn exists<P: Params>(&self, sql: &str, params: P) -> Result<bool> {
        let mut stmt = self.conn.prepare_cached(sql).with_sql(sql)?;
        stmt.exists(params).with_sql(sql)
    }

    // =====================================================================
    // Predicates
    // =====================================================================

    /// Surrogate id of the patient identified by (PatientID, PatientsName)
    pub fn patient_uid(&self, patient_id: &str, patients_name: &str) -> Result<Option<i64>> {
        const SQL: &str = "SELECT UID FROM Patients WHERE PatientID = ?1 AND PatientsName = ?2";
        let mut stmt = self.conn.prepare_cached(SQL).with_sql(SQL)?;
        stmt.query_row(params![patient_id, patients_name], |row| row.get(0))
            .optional()
            .with_sql(SQL)
    }

    pub fn patient_exists(&self, patient_id: &str, patients_name: &str) -> Result<bool> {
        Ok(self.patient_uid(patient_id, patients_name)?.is_some())
    }

    pub fn study_exists(&self, study_uid: &str) -> Result<bool> {
        self.exists(
            "SELECT 1 FROM Studies WHERE StudyInstanceUID = ?1",
            params![study_uid],
        )
    }

    pub fn series_exists(&self, series_uid: &str) -> Result<bool> {
        self.exists(
            "SELECT 1 FROM Series WHERE SeriesInstanceUID = ?1",
            params![series_uid],
        )
    }

    pub fn image_exists_by_filename(&self, filename: &str) -> Result<bool> {
        self.exists("SELECT 1 FROM Images WHERE Filename = ?1", params![filename])
    }

    pub fn image_by_sop(&self, sop_uid: &str) -> Result<Option<StoredImage>> {
        const SQL: &str = "SELECT Images.Filename, Images.InsertTimestamp, Images.SeriesInstanceUID, COALESCE(Series.StudyInstanceUID, '') FROM Images LEFT JOIN Series ON Series.SeriesInstanceUID = Images.SeriesInstanceUID WHERE Images.SOPInstanceUID = ?1";
        let mut stmt = self.conn.prepare_cached(SQL).with_sql(SQL)?;
        stmt.query_row(params![sop_uid], |row| {
            Ok(StoredImage {
                filename: row.get(0)?,
                insert_timestamp: row.get(1)?,
                series_uid: row.get(2)?,
                study_uid: row.get(3)?,
            })
        })
        .optional()
        .with_sql(SQL)
    }

    /// SOPInstanceUID of the row indexed under `filename`
    pub fn instance_by_filename(&self, filename: &str) -> Result<Option<String>> {
        const SQL: &str = "SELECT SOPInstanceUID FROM Images WHERE Filename = ?1";
        let mut stmt = self.conn.prepare_cached(SQL).with_sql(SQL)?;
        stmt.query_row(params![filename], |row| row.get(0))
            .optional()
            .with_sql(SQL)
    }

    // =====================================================================
    // Upserts
    // =====================================================================

    /// Insert the patient unless (PatientID, PatientsName) is already known
    ///
    /// Returns the surrogate id and whether a row was created.
    pub fn insert_patient(&self, identity: &Identity, attributes: &Attributes) -> Result<(i64, bool)> {
        if let Some(uid) = self.patient_uid(&identity.patient_id, &identity.patients_name)? {
            return Ok((uid, false));
        }

        self.exec(
            "INSERT INTO Patients (UID, PatientsName, PatientID, PatientsBirthDate, PatientsBirthTime, PatientsSex, PatientsAge, PatientsComments) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                identity.patients_name,
                identity.patient_id,
                iso_date(attr(attributes, tags::PATIENT_BIRTH_DATE)),
                attr(attributes, tags::PATIENT_BIRTH_TIME),
                attr(attributes, tags::PATIENT_SEX),
                attr(attributes, tags::PATIENT_AGE),
                attr(attributes, tags::PATIENT_COMMENTS),
            ],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    /// Insert the study unless its StudyInstanceUID is already known
    pub fn insert_study(&self, identity: &Identity, attributes: &Attributes, patient_uid: i64) -> Result<bool> {
        if self.study_exists(&identity.study_uid)? {
            return Ok(false);
        }

        self.exec(
            "INSERT INTO Studies (StudyInstanceUID, PatientsUID, StudyID, StudyDate, StudyTime, AccessionNumber, ModalitiesInStudy, InstitutionName, ReferringPhysician, PerformingPhysiciansName, StudyDescription) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                identity.study_uid,
                patient_uid,
                attr(attributes, tags::STUDY_ID),
                iso_date(attr(attributes, tags::STUDY_DATE)),
                attr(attributes, tags::STUDY_TIME),
                attr(attributes, tags::ACCESSION_NUMBER),
                attr(attributes, tags::MODALITIES_IN_STUDY),
                attr(attributes, tags::INSTITUTION_NAME),
                attr(attributes, tags::REFERRING_PHYSICIAN_NAME),
                attr(attributes, tags::PERFORMING_PHYSICIAN_NAME),
                attr(attributes, tags::STUDY_DESCRIPTION),
            ],
        )?;
        Ok(true)
    }

    /// Insert the series unless its SeriesInstanceUID is already known
    pub fn insert_series(&self, identity: &Identity, attributes: &Attributes) -> Result<bool> {
        if self.series_exists(&identity.series_uid)? {
            return Ok(false);
        }

        self.exec(
            "INSERT INTO Series (SeriesInstanceUID, StudyInstanceUID, SeriesNumber, SeriesDate, SeriesTime, SeriesDescription, Modality, BodyPartExamined, FrameOfReferenceUID, AcquisitionNumber, ContrastAgent, ScanningSequence, EchoNumber, TemporalPosition) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                identity.series_uid,
                identity.study_uid,
                attr_int(attributes, tags::SERIES_NUMBER),
                iso_date(attr(attributes, tags::SERIES_DATE)),
                attr(attributes, tags::SERIES_TIME),
                attr(attributes, tags::SERIES_DESCRIPTION),
                attr(attributes, tags::MODALITY),
                attr(attributes, tags::BODY_PART_EXAMINED),
                attr(attributes, tags::FRAME_OF_REFERENCE_UID),
                attr_int(attributes, tags::ACQUISITION_NUMBER),
                attr(attributes, tags::CONTRAST_BOLUS_AGENT),
                attr(attributes, tags::SCANNING_SEQUENCE),
                attr_int(attributes, tags::ECHO_NUMBERS),
                attr_int(attributes, tags::TEMPORAL_POSITION_IDENTIFIER),
            ],
        )?;
        Ok(true)
    }

    pub fn insert_image(&self, sop_uid: &str, filename: &str, series_uid: &str, timestamp: &str) -> Result<()> {
        self.exec(
            "INSERT INTO Images (SOPInstanceUID, Filename, SeriesInstanceUID, InsertTimestamp) VALUES (?1, ?2, ?3, ?4)",
            params![sop_uid, filename, series_uid, timestamp],
        )?;
        Ok(())
    }

    pub fn delete_image(&self, sop_uid: &str) -> Result<usize> {
        self.exec(
            "DELETE FROM Images WHERE SOPInstanceUID = ?1",
            params![sop_uid],
        )
    }

    pub fn delete_series_images(&self, series_uid: &str) -> Result<usize> {
        self.exec(
            "DELETE FROM Images WHERE SeriesInstanceUID = ?1",
            params![series_uid],
        )
    }

    /// Delete childless Series, then Studies, then Patients
    pub fn cleanup(&self) -> Result<usize> {
        let series = self.exec(CLEANUP_SERIES, [])?;
        let studies = self.exec(CLEANUP_STUDIES, [])?;
        let patients = self.exec(CLEANUP_PATIENTS, [])?;
        if series + studies + patients > 0 {
            tracing::debug!(series, studies, patients, "removed empty parents");
        }
        Ok(series + studies + patients)
    }
}

/// DICOM `DA` (`yyyymmdd`) to ISO `yyyy-mm-dd`; invalid dates become empty
pub(crate) fn iso_date(value: &str) -> String {
    NaiveDate::parse_from_str(value.trim(), "%Y%m%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// An instance about to be removed along with its files
struct Doomed {
    filename: String,
    sop_uid: String,
    series_uid: String,
    study_uid: String,
}

impl DicomDatabase {
    /// Delete childless Series, Studies and Patients
    pub fn cleanup(&mut self) -> Result<usize> {
        let result = Hierarchy::new(&self.conn, self.config.log_sql).cleanup();
        self.record(result)
    }

    /// Remove one instance, its managed file and thumbnail
    ///
    /// Returns whether the instance was indexed.
    pub fn remove_instance(&mut self, sop_uid: &str) -> Result<bool> {
        const SQL: &str = "SELECT Images.Filename, Images.SOPInstanceUID, Images.SeriesInstanceUID, Series.StudyInstanceUID FROM Images, Series WHERE Series.SeriesInstanceUID = Images.SeriesInstanceUID AND Images.SOPInstanceUID = ?1";
        let result = self.doomed(SQL, sop_uid).and_then(|doomed| {
            if doomed.is_empty() {
                return Ok(false);
            }
            Hierarchy::new(&self.conn, self.config.log_sql).delete_image(sop_uid)?;
            self.finish_removal(&doomed)?;
            Ok(true)
        });
        self.record(result)
    }

    /// Remove every instance of a series, then empty parents
    ///
    /// Returns the number of instances removed.
    pub fn remove_series(&mut self, series_uid: &str) -> Result<usize> {
        const SQL: &str = "SELECT Images.Filename, Images.SOPInstanceUID, Images.SeriesInstanceUID, Series.StudyInstanceUID FROM Images, Series WHERE Series.SeriesInstanceUID = Images.SeriesInstanceUID AND Images.SeriesInstanceUID = ?1";
        let result = self.doomed(SQL, series_uid).and_then(|doomed| {
            Hierarchy::new(&self.conn, self.config.log_sql).delete_series_images(series_uid)?;
            self.finish_removal(&doomed)?;
            Ok(doomed.len())
        });
        self.record(result)
    }

    /// Remove every series of a study
    pub fn remove_study(&mut self, study_uid: &str) -> Result<usize> {
        let mut removed = 0;
        for series_uid in self.series_for_study(study_uid) {
            removed += self.remove_series(&series_uid)?;
        }
        let result = Hierarchy::new(&self.conn, self.config.log_sql).cleanup();
        self.record(result)?;
        Ok(removed)
    }

    /// Remove every study of a patient
    pub fn remove_patient(&mut self, patient_uid: i64) -> Result<usize> {
        let mut removed = 0;
        for study_uid in self.studies_for_patient(patient_uid) {
            removed += self.remove_study(&study_uid)?;
        }
        let result = Hierarchy::new(&self.conn, self.config.log_sql).cleanup();
        self.record(result)?;
        Ok(removed)
    }

    fn doomed(&self, sql: &str, key: &str) -> Result<Vec<Doomed>> {
        let mut stmt = self.conn.prepare_cached(sql).with_sql(sql)?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok(Doomed {
                    filename: row.get(0)?,
                    sop_uid: row.get(1)?,
                    series_uid: row.get(2)?,
                    study_uid: row.get(3)?,
                })
            })
            .with_sql(sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().with_sql(sql)
    }

    /// Delete files of removed rows, drop empty parents, notify
    fn finish_removal(&mut self, doomed: &[Doomed]) -> Result<()> {
        if let Some(store) = &self.store {
            for d in doomed {
                store.remove_instance(Path::new(&d.filename), &d.study_uid, &d.series_uid, &d.sop_uid);
            }
        }
        Hierarchy::new(&self.conn, self.config.log_sql).cleanup()?;

        // Sessions must not reuse parents that may be gone now
        self.generation += 1;
        if !doomed.is_empty() {
            tracing::info!(count = doomed.len(), "removed instances");
            self.events.emit(IndexEvent::StructureChanged);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_date() {
        assert_eq!(iso_date("20240229"), "2024-02-29");
        assert_eq!(iso_date("2024"), "");
        assert_eq!(iso_date(""), "");
    }
}
