//! `dicom-index ls` command - Navigate the patient / study / series hierarchy

use clap::Subcommand;
use miette::Result;

use crate::cli::args::GlobalOpts;
use crate::cli::helpers::{open_database, truncate_str};
use crate::cli::table::ListTable;

#[derive(Subcommand, Debug)]
pub enum LsCommands {
    /// List all patients
    Patients,

    /// List studies (of one patient, or all)
    Studies {
        /// Patient UID as shown by `ls patients`
        patient: Option<i64>,
    },

    /// List series (of one study, or all)
    Series {
        /// StudyInstanceUID
        study: Option<String>,
    },

    /// List the instances of a series
    Instances {
        /// SeriesInstanceUID
        series: String,
    },
}

pub fn run(cmd: LsCommands, global: &GlobalOpts) -> Result<()> {
    let db = open_database(global)?;

    match cmd {
        LsCommands::Patients => {
            let records: Vec<_> = db
                .patients()
                .into_iter()
                .filter_map(|uid| db.patient_record(uid))
                .collect();
            let mut table = ListTable::new(&["UID", "Name", "Patient ID", "Birth date", "Sex", "Studies"]);
            for record in &records {
                let studies = db.studies_for_patient(record.uid).len();
                table.push(
                    vec![
                        record.uid.to_string(),
                        truncate_str(&record.patients_name, 32),
                        record.patient_id.clone(),
                        record.birth_date.clone(),
                        record.sex.clone(),
                        studies.to_string(),
                    ],
                    record,
                );
            }
            finish(&table, global, "patients");
        }
        LsCommands::Studies { patient } => {
            let patients = match patient {
                Some(uid) => vec![uid],
                None => db.patients(),
            };
            let records: Vec<_> = patients
                .into_iter()
                .flat_map(|uid| db.studies_for_patient(uid))
                .filter_map(|uid| db.study_record(&uid))
                .collect();
            let mut table = ListTable::new(&["Study UID", "Patient", "Date", "Description", "Series"]);
            for record in &records {
                let series = db.series_for_study(&record.study_instance_uid).len();
                table.push(
                    vec![
                        record.study_instance_uid.clone(),
                        record.patients_uid.to_string(),
                        record.study_date.clone(),
                        truncate_str(&record.study_description, 40),
                        series.to_string(),
                    ],
                    record,
                );
            }
            finish(&table, global, "studies");
        }
        LsCommands::Series { study } => {
            let studies = match study {
                Some(uid) => vec![uid],
                None => db
                    .patients()
                    .into_iter()
                    .flat_map(|uid| db.studies_for_patient(uid))
                    .collect(),
            };
            let records: Vec<_> = studies
                .iter()
                .flat_map(|uid| db.series_for_study(uid))
                .filter_map(|uid| db.series_record(&uid))
                .collect();
            let mut table = ListTable::new(&["Series UID", "Number", "Modality", "Description", "Instances"]);
            for record in &records {
                let instances = db.instances_for_series(&record.series_instance_uid).len();
                table.push(
                    vec![
                        record.series_instance_uid.clone(),
                        record.series_number.to_string(),
                        record.modality.clone(),
                        truncate_str(&record.series_description, 40),
                        instances.to_string(),
                    ],
                    record,
                );
            }
            finish(&table, global, "series");
        }
        LsCommands::Instances { series } => {
            let records = db.images_for_series(&series);
            let mut table = ListTable::new(&["SOP Instance UID", "File", "Inserted"]);
            for record in &records {
                table.push(
                    vec![
                        record.sop_instance_uid.clone(),
                        record.filename.clone(),
                        record
                            .insert_timestamp
                            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_default(),
                    ],
                    record,
                );
            }
            finish(&table, global, "instances");
        }
    }

    Ok(())
}

fn finish<T: serde::Serialize>(table: &ListTable<'_, T>, global: &GlobalOpts, what: &str) {
    if table.is_empty() && !global.quiet && global.format != crate::cli::args::OutputFormat::Json {
        eprintln!("No {} found", what);
        return;
    }
    table.print(global.format);
}
