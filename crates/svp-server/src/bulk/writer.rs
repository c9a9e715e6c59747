//! Bulk writer
//!
//! Persists candidate records one insert at a time. Each insert succeeds or
//! fails on its own; nothing is rolled back when a later record fails.

use std::sync::Arc;
use tracing::{debug, warn};

use super::models::{Outcome, StudentRecord, VaccinationRecord};
use super::pipeline::INTERNAL_ERROR_MESSAGE;
use crate::records::{DriveDirectory, RecordError, StudentRepository, VaccinationRepository};

pub fn no_drive_reason(drive_id: i64) -> String {
    format!("no drive exists with drive_id : {}", drive_id)
}

pub fn no_student_reason(student_id: i64) -> String {
    format!("no student exists with student_id : {}", student_id)
}

/// Remark shown in the report for a failed insert. Database failures are
/// logged in full but reported generically.
pub fn insert_failure_reason(err: &RecordError) -> String {
    match err {
        RecordError::Database(_) => INTERNAL_ERROR_MESSAGE.to_string(),
        RecordError::Duplicate(reason) | RecordError::Rejected(reason) => reason.clone(),
    }
}

#[derive(Clone)]
pub struct BulkWriter {
    students: Arc<dyn StudentRepository>,
    vaccinations: Arc<dyn VaccinationRepository>,
    drives: Arc<dyn DriveDirectory>,
}

impl BulkWriter {
    pub fn new(
        students: Arc<dyn StudentRepository>,
        vaccinations: Arc<dyn VaccinationRepository>,
        drives: Arc<dyn DriveDirectory>,
    ) -> Self {
        Self {
            students,
            vaccinations,
            drives,
        }
    }

    /// One insert attempt per student, outcomes in submission order
    pub async fn write_students(&self, records: Vec<StudentRecord>) -> Vec<Outcome<StudentRecord>> {
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            match self.students.create_student(&record).await {
                Ok(id) => {
                    debug!(student_id = id, "Student created");
                    outcomes.push(Outcome::accepted(record));
                },
                Err(e) => {
                    warn!(error = %e, roll_number = %record.roll_number, "Student insert failed");
                    let reason = insert_failure_reason(&e);
                    outcomes.push(Outcome::rejected(record, reason));
                },
            }
        }

        outcomes
    }

    /// Check that the drive and then the student exist for every record,
    /// insert the ones that pass, and return the insert outcomes followed by
    /// the existence rejections, each group in submission order.
    pub async fn write_vaccinations(
        &self,
        records: Vec<VaccinationRecord>,
    ) -> Vec<Outcome<VaccinationRecord>> {
        let mut verified = Vec::with_capacity(records.len());
        let mut missing = Vec::new();

        for record in records {
            if let Some(reason) = self.existence_problem(&record).await {
                missing.push(Outcome::rejected(record, reason));
            } else {
                verified.push(record);
            }
        }

        let mut outcomes = Vec::with_capacity(verified.len() + missing.len());
        for record in verified {
            match self.vaccinations.create_vaccination_record(&record).await {
                Ok(_) => outcomes.push(Outcome::accepted(record)),
                Err(e) => {
                    warn!(
                        error = %e,
                        student_id = record.student_id,
                        drive_id = record.drive_id,
                        "Vaccination record insert failed"
                    );
                    outcomes.push(Outcome::rejected(record, insert_failure_reason(&e)));
                },
            }
        }

        outcomes.extend(missing);
        outcomes
    }

    /// A failed lookup counts as a missing row
    async fn existence_problem(&self, record: &VaccinationRecord) -> Option<String> {
        match self.drives.drive_exists(record.drive_id).await {
            Ok(true) => {},
            Ok(false) => return Some(no_drive_reason(record.drive_id)),
            Err(e) => {
                warn!(error = %e, drive_id = record.drive_id, "Drive lookup failed");
                return Some(no_drive_reason(record.drive_id));
            },
        }

        match self.students.student_exists(record.student_id).await {
            Ok(true) => None,
            Ok(false) => Some(no_student_reason(record.student_id)),
            Err(e) => {
                warn!(error = %e, student_id = record.student_id, "Student lookup failed");
                Some(no_student_reason(record.student_id))
            },
        }
    }
}
