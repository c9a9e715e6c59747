//! Row schemas and the row processor
//!
//! Each job kind is bound to a [`RowSchema`] that knows how to turn sheet
//! cells into a record, validate it, persist a batch of records and render a
//! record back into report cells. The pipeline picks the schema once, when it
//! dispatches on [`JobKind`].

use async_trait::async_trait;
use std::fmt::Debug;
use svp_common::JobKind;
use thiserror::Error;

use super::models::{Outcome, StudentRecord, VaccinationRecord};
use super::parser::Sheet;
use super::writer::BulkWriter;
use crate::config::RowFailurePolicy;

/// Lowest and highest accepted school grade
pub const MIN_GRADE: u32 = 1;
pub const MAX_GRADE: u32 = 12;

/// Reason recorded for vaccination rows that parse but fail field validation
pub const INVALID_INPUT: &str = "invalid input";

/// A single report cell
#[derive(Debug, Clone, PartialEq)]
pub enum ReportCell {
    Text(String),
    Number(f64),
}

impl From<&str> for ReportCell {
    fn from(value: &str) -> Self {
        ReportCell::Text(value.to_string())
    }
}

#[async_trait]
pub trait RowSchema: Send + Sync + 'static {
    type Record: Clone + Debug + Send + Sync + 'static;

    const KIND: JobKind;

    /// Report column headers for the record fields, in cell order
    const REPORT_HEADERS: &'static [&'static str];

    /// Build a record from a row that already has the expected width.
    /// `Err` means the cells cannot represent a record at all.
    fn to_record(cells: &[String]) -> Result<Self::Record, String>;

    /// Field validation; `Err` carries the rejection reason
    fn validate(record: &Self::Record) -> Result<(), String>;

    fn report_cells(record: &Self::Record) -> Vec<ReportCell>;

    /// Insert the records, returning one outcome per record in the order
    /// they should appear in the report
    async fn persist(writer: &BulkWriter, records: Vec<Self::Record>) -> Vec<Outcome<Self::Record>>;
}

// ============================================================================
// Students
// ============================================================================

pub struct StudentSchema;

/// Grade-validity rule: the class must be a whole grade from 1 to 12
pub fn is_valid_grade(class: &str) -> bool {
    class
        .trim()
        .parse::<u32>()
        .map(|grade| (MIN_GRADE..=MAX_GRADE).contains(&grade))
        .unwrap_or(false)
}

#[async_trait]
impl RowSchema for StudentSchema {
    type Record = StudentRecord;

    const KIND: JobKind = JobKind::StudentRecord;

    const REPORT_HEADERS: &'static [&'static str] =
        &["Name", "Class", "Gender", "Roll Number", "Phone Number"];

    fn to_record(cells: &[String]) -> Result<StudentRecord, String> {
        match cells {
            [name, class, gender, roll_number, phone_no] => Ok(StudentRecord {
                name: name.clone(),
                class: class.clone(),
                gender: gender.clone(),
                roll_number: roll_number.clone(),
                phone_no: phone_no.clone(),
            }),
            _ => Err(format!("expected 5 cells, found {}", cells.len())),
        }
    }

    fn validate(record: &StudentRecord) -> Result<(), String> {
        let mut problems = Vec::new();

        let required = [
            ("name", &record.name),
            ("gender", &record.gender),
            ("roll number", &record.roll_number),
            ("phone number", &record.phone_no),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                problems.push(format!("{} is required", field));
            }
        }

        if record.class.trim().is_empty() {
            problems.push("class is required".to_string());
        } else if !is_valid_grade(&record.class) {
            problems.push(format!(
                "class must be a grade between {} and {}",
                MIN_GRADE, MAX_GRADE
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    fn report_cells(record: &StudentRecord) -> Vec<ReportCell> {
        vec![
            record.name.as_str().into(),
            record.class.as_str().into(),
            record.gender.as_str().into(),
            record.roll_number.as_str().into(),
            record.phone_no.as_str().into(),
        ]
    }

    async fn persist(writer: &BulkWriter, records: Vec<StudentRecord>) -> Vec<Outcome<StudentRecord>> {
        writer.write_students(records).await
    }
}

// ============================================================================
// Vaccinations
// ============================================================================

pub struct VaccinationSchema;

#[async_trait]
impl RowSchema for VaccinationSchema {
    type Record = VaccinationRecord;

    const KIND: JobKind = JobKind::VaccineRecord;

    const REPORT_HEADERS: &'static [&'static str] = &["Student Id", "Drive Id"];

    fn to_record(cells: &[String]) -> Result<VaccinationRecord, String> {
        match cells {
            [student_id, drive_id] => {
                let student_id = student_id
                    .trim()
                    .parse()
                    .map_err(|_| format!("student id '{}' is not a number", student_id))?;
                let drive_id = drive_id
                    .trim()
                    .parse()
                    .map_err(|_| format!("drive id '{}' is not a number", drive_id))?;
                Ok(VaccinationRecord {
                    student_id,
                    drive_id,
                })
            },
            _ => Err(format!("expected 2 cells, found {}", cells.len())),
        }
    }

    fn validate(record: &VaccinationRecord) -> Result<(), String> {
        if record.student_id > 0 && record.drive_id > 0 {
            Ok(())
        } else {
            Err(INVALID_INPUT.to_string())
        }
    }

    fn report_cells(record: &VaccinationRecord) -> Vec<ReportCell> {
        vec![
            ReportCell::Number(record.student_id as f64),
            ReportCell::Number(record.drive_id as f64),
        ]
    }

    async fn persist(
        writer: &BulkWriter,
        records: Vec<VaccinationRecord>,
    ) -> Vec<Outcome<VaccinationRecord>> {
        writer.write_vaccinations(records).await
    }
}

// ============================================================================
// Row processor
// ============================================================================

/// Rows split into records to persist and outcomes rejected before persistence
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<R> {
    pub candidates: Vec<R>,
    pub rejected: Vec<Outcome<R>>,
}

/// Raised under [`RowFailurePolicy::Abort`] for the first row that cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid entry at row {row}")]
pub struct InvalidEntry {
    pub row: usize,
}

/// Split the data rows of `sheet` into persist candidates and rejected outcomes.
///
/// The sheet must already have passed the width check. Both lists keep sheet
/// order.
pub fn partition<S: RowSchema>(
    sheet: &Sheet,
    policy: RowFailurePolicy,
) -> Result<Partition<S::Record>, InvalidEntry> {
    let mut candidates = Vec::new();
    let mut rejected = Vec::new();

    for (row, cells) in sheet.data_rows() {
        let record = match S::to_record(cells) {
            Ok(record) => record,
            Err(detail) => {
                tracing::debug!(row, detail = %detail, "Row could not be parsed");
                let entry = InvalidEntry { row };
                match policy {
                    RowFailurePolicy::Abort => return Err(entry),
                    RowFailurePolicy::Skip => {
                        rejected.push(Outcome::unparsed(cells.to_vec(), entry.to_string()));
                        continue;
                    },
                }
            },
        };

        match S::validate(&record) {
            Ok(()) => candidates.push(record),
            Err(reason) => rejected.push(Outcome::rejected(record, reason)),
        }
    }

    Ok(Partition {
        candidates,
        rejected,
    })
}
