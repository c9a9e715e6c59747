//! Wire-level types shared by the HTTP front door and the queue worker

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SvpError;

// ============================================================================
// Job Kind
// ============================================================================

/// Kind of bulk upload a job carries.
///
/// Serialized as `STUDENT_RECORD` / `VACCINE_RECORD` in job rows and queue
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    StudentRecord,
    VaccineRecord,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::StudentRecord => "STUDENT_RECORD",
            JobKind::VaccineRecord => "VACCINE_RECORD",
        }
    }

    /// Number of columns every data row of this kind must carry
    pub fn expected_width(&self) -> usize {
        match self {
            JobKind::StudentRecord => 5,
            JobKind::VaccineRecord => 2,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = SvpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STUDENT_RECORD" => Ok(JobKind::StudentRecord),
            "VACCINE_RECORD" => Ok(JobKind::VaccineRecord),
            other => Err(SvpError::UnknownJobKind(other.to_string())),
        }
    }
}

// ============================================================================
// Job Status
// ============================================================================

/// Lifecycle status of a bulk upload job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Processed => "PROCESSED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Processed | JobStatus::Failed)
    }

    /// Forward-only state machine. Handing a PROCESSING job to a new worker
    /// after its lease expires changes the owner, not the status, so
    /// `Processing -> Processing` is not a transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SvpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "PROCESSED" => Ok(JobStatus::Processed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(SvpError::UnknownJobStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Pagination
// ============================================================================

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Limit/offset window for job listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    /// Build a window from optional query values, clamping the limit to
    /// `1..=MAX_PAGE_LIMIT` and the offset to `>= 0`.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit
                .unwrap_or(DEFAULT_PAGE_LIMIT)
                .clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}
