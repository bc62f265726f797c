//! Versioned schema bootstrap and rebuild
//!
//! A version mismatch is resolved by rebuilding: the file list is set aside
//! in `Filenames_backup`, the schema is recreated, and every file is indexed
//! again through the normal ingest path. The backup table is dropped only
//! once the replay finished, so an interrupted rebuild is resumed by the
//! next [`DicomDatabase::update_schema_if_needed`].

use super::ingest::{IngestSession, InsertOptions};
use super::types::SchemaUpdateReport;
use super::DicomDatabase;
use crate::core::error::{Result, StatementContext};
use crate::core::events::IndexEvent;

/// A schema definition and the version marker it writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub version: &'static str,
    /// Drops and recreates every index table (never the backup table)
    pub script: &'static str,
}

impl Schema {
    pub const CURRENT: Schema = Schema {
        version: "0.6.0",
        script: SCHEMA_SQL,
    };
}

const SCHEMA_SQL: &str = r#"
DROP TABLE IF EXISTS SchemaInfo;
DROP TABLE IF EXISTS Images;
DROP TABLE IF EXISTS Patients;
DROP TABLE IF EXISTS Series;
DROP TABLE IF EXISTS Studies;

CREATE TABLE SchemaInfo (
    Version VARCHAR(1024) NOT NULL
);

CREATE TABLE Images (
    SOPInstanceUID VARCHAR(64) NOT NULL,
    Filename VARCHAR(1024) NOT NULL,
    SeriesInstanceUID VARCHAR(64) NOT NULL,
    InsertTimestamp VARCHAR(40) NOT NULL,
    PRIMARY KEY (SOPInstanceUID)
);
CREATE UNIQUE INDEX ImagesFilenameIndex ON Images (Filename);
CREATE INDEX ImagesSeriesIndex ON Images (SeriesInstanceUID);

CREATE TABLE Patients (
    UID INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    PatientsName VARCHAR(255) NULL,
    PatientID VARCHAR(255) NULL,
    PatientsBirthDate DATE NULL,
    PatientsBirthTime TIME NULL,
    PatientsSex VARCHAR(1) NULL,
    PatientsAge VARCHAR(10) NULL,
    PatientsComments VARCHAR(255) NULL
);
CREATE INDEX PatientsIdentityIndex ON Patients (PatientID, PatientsName);

CREATE TABLE Studies (
    StudyInstanceUID VARCHAR(64) NOT NULL,
    PatientsUID INT NOT NULL,
    StudyID VARCHAR(255) NULL,
    StudyDate DATE NULL,
    StudyTime VARCHAR(20) NULL,
    AccessionNumber VARCHAR(255) NULL,
    ModalitiesInStudy VARCHAR(255) NULL,
    InstitutionName VARCHAR(255) NULL,
    ReferringPhysician VARCHAR(255) NULL,
    PerformingPhysiciansName VARCHAR(255) NULL,
    StudyDescription VARCHAR(255) NULL,
    PRIMARY KEY (StudyInstanceUID)
);
CREATE INDEX StudiesPatientIndex ON Studies (PatientsUID);

CREATE TABLE Series (
    SeriesInstanceUID VARCHAR(64) NOT NULL,
    StudyInstanceUID VARCHAR(64) NOT NULL,
    SeriesNumber INT NULL,
    SeriesDate DATE NULL,
    SeriesTime VARCHAR(20) NULL,
    SeriesDescription VARCHAR(255) NULL,
    Modality VARCHAR(20) NULL,
    BodyPartExamined VARCHAR(255) NULL,
    FrameOfReferenceUID VARCHAR(64) NULL,
    AcquisitionNumber INT NULL,
    ContrastAgent VARCHAR(255) NULL,
    ScanningSequence VARCHAR(45) NULL,
    EchoNumber INT NULL,
    TemporalPosition INT NULL,
    PRIMARY KEY (SeriesInstanceUID)
);
CREATE INDEX SeriesStudyIndex ON Series (StudyInstanceUID);
"#;

const BACKUP_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS Filenames_backup (Filename TEXT PRIMARY KEY NOT NULL)";

impl DicomDatabase {
    /// Version marker stored in the database, if any
    pub fn schema_version_loaded(&self) -> Option<String> {
        self.conn
            .query_row("SELECT Version FROM SchemaInfo", [], |row| row.get(0))
            .ok()
    }

    /// Version this build of the index expects
    pub fn schema_version(&self) -> &'static str {
        Schema::CURRENT.version
    }

    /// Drop and recreate all index tables (the index becomes empty)
    pub fn initialize_schema(&mut self, schema: &Schema) -> Result<()> {
        let result = self.run_schema_script(schema);
        if result.is_ok() {
            self.generation += 1;
        }
        self.record(result)
    }

    fn run_schema_script(&mut self, schema: &Schema) -> Result<()> {
        tracing::info!(version = schema.version, "initializing index schema");
        let tx = self.conn.transaction().with_sql("BEGIN")?;
        tx.execute_batch(schema.script).with_sql("schema script")?;
        tx.execute(
            "INSERT INTO SchemaInfo (Version) VALUES (?1)",
            [schema.version],
        )
        .with_sql("INSERT INTO SchemaInfo")?;
        tx.commit().with_sql("COMMIT")
    }

    /// Whether a rebuild is pending (version mismatch or interrupted rebuild)
    pub fn schema_update_needed(&self) -> bool {
        self.schema_version_loaded().as_deref() != Some(self.schema_version())
            || self.table_exists("Filenames_backup")
    }

    /// Rebuild to [`Schema::CURRENT`] if needed
    pub fn update_schema_if_needed(
        &mut self,
        progress: Option<&mut dyn FnMut(usize, &str)>,
    ) -> Result<Option<SchemaUpdateReport>> {
        if !self.schema_update_needed() {
            tracing::debug!("schema up to date");
            return Ok(None);
        }
        self.update_schema(&Schema::CURRENT, progress).map(Some)
    }

    /// Rebuild the index under `schema`, re-indexing every known file
    ///
    /// Files that fail to re-index are listed in the report. There is no
    /// rollback: a failure part way leaves the new schema partially filled.
    pub fn update_schema(
        &mut self,
        schema: &Schema,
        mut progress: Option<&mut dyn FnMut(usize, &str)>,
    ) -> Result<SchemaUpdateReport> {
        let from = self.schema_version_loaded();
        let backup = self.back_up_filenames();
        self.record(backup)?;

        let rebuilt = self.run_schema_script(schema);
        self.record(rebuilt)?;
        self.generation += 1;

        let files = self.backed_up_filenames();
        let mut report = SchemaUpdateReport {
            total: files.len(),
            ..Default::default()
        };
        tracing::info!(
            from = ?from,
            to = schema.version,
            files = files.len(),
            "rebuilding index"
        );
        self.events.emit(IndexEvent::SchemaUpdateStarted(files.len()));

        let mut session = IngestSession::new();
        for (index, file) in files.iter().enumerate() {
            if let Some(progress) = progress.as_mut() {
                progress(index, file);
            }
            self.events.emit(IndexEvent::SchemaUpdateProgress {
                index,
                file: file.clone(),
            });

            match self.insert_file(&mut session, std::path::Path::new(file), InsertOptions::index_only()) {
                Ok(_) => report.reinserted += 1,
                Err(e) => {
                    tracing::warn!(file = %file, error = %e, "file not re-indexed");
                    report.failed.push((file.clone(), e.to_string()));
                }
            }
        }

        let dropped = self
            .conn
            .execute_batch("DROP TABLE IF EXISTS Filenames_backup")
            .with_sql("DROP TABLE Filenames_backup");
        self.record(dropped)?;

        self.events.emit(IndexEvent::SchemaUpdated);
        if !report.is_complete() {
            self.last_error = Some(format!(
                "{} of {} files could not be re-indexed",
                report.failed.len(),
                report.total
            ));
        }
        Ok(report)
    }

    /// Merge the current file list into the backup table
    fn back_up_filenames(&mut self) -> Result<()> {
        let images_exist = self.table_exists("Images");
        let tx = self.conn.transaction().with_sql("BEGIN")?;
        tx.execute_batch(BACKUP_TABLE).with_sql(BACKUP_TABLE)?;
        if images_exist {
            const SQL: &str = "INSERT OR IGNORE INTO Filenames_backup SELECT Filename FROM Images";
            tx.execute_batch(SQL).with_sql(SQL)?;
        }
        tx.commit().with_sql("COMMIT")
    }

    fn backed_up_filenames(&self) -> Vec<String> {
        let mut stmt = match self.conn.prepare("SELECT Filename FROM Filenames_backup ORDER BY Filename") {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        let rows = match stmt.query_map([], |row| row.get(0)) {
            Ok(r) => r,
            Err(_) => return vec![],
        };
        rows.filter_map(|r| r.ok()).collect()
    }

    pub(super) fn table_exists(&self, name: &str) -> bool {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |_| Ok(()),
            )
            .is_ok()
    }
}
