//! Bulk upload domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use svp_common::{JobKind, JobStatus};
use uuid::Uuid;

// ============================================================================
// Jobs
// ============================================================================

/// One asynchronous unit of work tied to a single uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub request_id: Uuid,
    pub request_type: JobKind,
    pub status: JobStatus,
    pub file_name: String,
    /// Blob key of the uploaded source file
    pub source_key: String,
    /// Blob key of the generated report, set once the job is PROCESSED with a report
    pub report_key: Option<String>,
    pub total_records: i64,
    pub processed_records: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a job row is first created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub request_id: Uuid,
    pub request_type: JobKind,
    pub file_name: String,
    pub source_key: String,
}

/// Explicit change-set for a job row.
///
/// `None` leaves a column untouched, so zero counts and a cleared error
/// message (`Some(None)`) can be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub report_key: Option<String>,
    pub total_records: Option<i64>,
    pub processed_records: Option<i64>,
    pub error_message: Option<Option<String>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_total_records(mut self, total: i64) -> Self {
        self.total_records = Some(total);
        self
    }

    pub fn with_processed_records(mut self, processed: i64) -> Self {
        self.processed_records = Some(processed);
        self
    }

    pub fn with_report_key(mut self, key: impl Into<String>) -> Self {
        self.report_key = Some(key.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Job descriptor carried on the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: i64,
    pub request_id: Uuid,
    pub request_type: JobKind,
    pub status: JobStatus,
    pub file_name: String,
    pub source_key: String,
    #[serde(default)]
    pub report_key: Option<String>,
    #[serde(default)]
    pub total_records: i64,
    #[serde(default)]
    pub processed_records: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl From<&Job> for JobMessage {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            request_id: job.request_id,
            request_type: job.request_type,
            status: job.status,
            file_name: job.file_name.clone(),
            source_key: job.source_key.clone(),
            report_key: job.report_key.clone(),
            total_records: job.total_records,
            processed_records: job.processed_records,
            error_message: job.error_message.clone(),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// One student roster row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub name: String,
    pub class: String,
    pub gender: String,
    pub roll_number: String,
    pub phone_no: String,
}

/// Assignment of a student to a vaccination drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaccinationRecord {
    pub student_id: i64,
    pub drive_id: i64,
}

// ============================================================================
// Outcomes
// ============================================================================

/// What a report row shows for a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowPayload<R> {
    /// The row was turned into a record
    Parsed(R),
    /// The row could not be turned into a record; raw cell text is kept
    Unparsed(Vec<String>),
}

/// Per-record result of a persistence attempt or a pre-persistence rejection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<R> {
    pub payload: RowPayload<R>,
    pub success: bool,
    /// Present only when `success` is false
    pub reason: Option<String>,
}

impl<R> Outcome<R> {
    pub fn accepted(record: R) -> Self {
        Self {
            payload: RowPayload::Parsed(record),
            success: true,
            reason: None,
        }
    }

    pub fn rejected(record: R, reason: impl Into<String>) -> Self {
        Self {
            payload: RowPayload::Parsed(record),
            success: false,
            reason: Some(reason.into()),
        }
    }

    pub fn unparsed(cells: Vec<String>, reason: impl Into<String>) -> Self {
        Self {
            payload: RowPayload::Unparsed(cells),
            success: false,
            reason: Some(reason.into()),
        }
    }

    pub fn record(&self) -> Option<&R> {
        match &self.payload {
            RowPayload::Parsed(record) => Some(record),
            RowPayload::Unparsed(_) => None,
        }
    }
}
