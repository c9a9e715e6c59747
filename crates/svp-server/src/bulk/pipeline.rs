//! Bulk job pipeline
//!
//! Runs one queued job end to end: download the source file, validate and
//! parse it, persist the rows, publish the result report and record the
//! terminal status. Problems with the file itself end in a FAILED job; only
//! a failure to write the job row is returned as an error, which leaves the
//! delivery unacknowledged so it is retried.
//!
//! A run first claims the job row. While the run lasts a heartbeat keeps the
//! claim's lease alive; if the lease is lost the run stops at once, since
//! another worker may already own the job.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use svp_common::{JobKind, JobStatus};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::models::{Job, JobMessage, Outcome};
use super::parser::{read_workbook, ParseError, Sheet};
use super::report::{accepted_count, write_report};
use super::rows::{partition, RowSchema, StudentSchema, VaccinationSchema};
use super::store::{JobStore, StoreError};
use super::tracker::JobTracker;
use super::writer::BulkWriter;
use crate::config::BulkConfig;
use crate::storage::{report_key, BlobStore, XLSX_CONTENT_TYPE};

/// Failure message recorded when the worker itself breaks down
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// Error message recorded on a PROCESSED job whose report could not be published
pub const REPORT_NOT_GENERATED: &str = "Report file not generated";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to record job state: {0}")]
    Store(#[from] StoreError),
}

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job reached this terminal status during this run
    Finished(JobStatus),
    /// The job was already terminal; nothing was done
    AlreadyTerminal(JobStatus),
    /// No job row exists for the message
    Missing,
    /// Another worker holds a live lease on the job
    Busy,
}

/// Anything the dispatcher can hand a decoded message to
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    async fn process(&self, message: JobMessage) -> Result<RunOutcome, PipelineError>;
}

/// Result of the file-handling stages, before it is written to the job row
enum Verdict {
    Failed(String),
    Processed {
        processed: i64,
        report_key: Option<String>,
    },
}

pub struct Pipeline {
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    writer: BulkWriter,
    config: BulkConfig,
}

impl Pipeline {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        writer: BulkWriter,
        config: BulkConfig,
    ) -> Self {
        Self {
            jobs,
            blobs,
            writer,
            config,
        }
    }

    /// Run the job named by `message`.
    ///
    /// The job row, not the message, is authoritative for kind and status.
    #[instrument(skip(self, message), fields(request_id = %message.request_id))]
    pub async fn run(&self, message: JobMessage) -> Result<RunOutcome, PipelineError> {
        let job = match self.jobs.get(message.request_id).await? {
            Some(job) => job,
            None => {
                warn!("No job row for queued message, dropping it");
                return Ok(RunOutcome::Missing);
            },
        };

        if job.status.is_terminal() {
            info!(status = %job.status, "Job already finished, skipping redelivery");
            return Ok(RunOutcome::AlreadyTerminal(job.status));
        }

        if job.request_type != message.request_type {
            warn!(
                message_kind = %message.request_type,
                job_kind = %job.request_type,
                "Message kind disagrees with job row, using the job row"
            );
        }

        let lease_ttl = Duration::from_secs(self.config.job_lease_secs);
        let Some(tracker) = JobTracker::claim(self.jobs.clone(), &job, lease_ttl).await? else {
            return self.unclaimed(job.request_id).await;
        };

        let status = match tracker.job().request_type {
            JobKind::StudentRecord => self.run_job::<StudentSchema>(tracker).await?,
            JobKind::VaccineRecord => self.run_job::<VaccinationSchema>(tracker).await?,
        };
        Ok(RunOutcome::Finished(status))
    }

    /// Explain a lost claim from the row as it stands now
    async fn unclaimed(&self, request_id: Uuid) -> Result<RunOutcome, PipelineError> {
        match self.jobs.get(request_id).await? {
            None => {
                warn!("Job row vanished before it could be claimed");
                Ok(RunOutcome::Missing)
            },
            Some(job) if job.status.is_terminal() => {
                info!(status = %job.status, "Job finished by another worker");
                Ok(RunOutcome::AlreadyTerminal(job.status))
            },
            Some(_) => {
                info!("Job leased to another worker");
                Ok(RunOutcome::Busy)
            },
        }
    }

    /// Run the claimed job while keeping its lease alive
    async fn run_job<S: RowSchema>(&self, mut tracker: JobTracker) -> Result<JobStatus, PipelineError> {
        let heartbeat = tracker.heartbeat();
        let request_id = tracker.job().request_id;
        tokio::select! {
            status = self.finish::<S>(&mut tracker) => status,
            lost = heartbeat.run() => {
                error!(%request_id, error = %lost, "Lost job lease, abandoning run");
                Err(PipelineError::Store(lost))
            },
        }
    }

    async fn finish<S: RowSchema>(&self, tracker: &mut JobTracker) -> Result<JobStatus, PipelineError> {
        match self.execute::<S>(tracker).await? {
            Verdict::Failed(message) => tracker.fail(message).await?,
            Verdict::Processed {
                processed,
                report_key: Some(key),
            } => tracker.complete(processed, Some(key), None).await?,
            Verdict::Processed {
                processed,
                report_key: None,
            } => {
                tracker
                    .complete(processed, None, Some(REPORT_NOT_GENERATED.to_string()))
                    .await?
            },
        }

        Ok(tracker.job().status)
    }

    async fn execute<S: RowSchema>(&self, tracker: &mut JobTracker) -> Result<Verdict, StoreError> {
        let job = tracker.job().clone();

        let sheet = match self.fetch_and_parse(&job).await {
            Ok(sheet) => sheet,
            Err(message) => return Ok(Verdict::Failed(message)),
        };

        tracker.record_total(sheet.total_records() as i64).await?;

        if let Err(e) = sheet.check_width(S::KIND.expected_width()) {
            return Ok(Verdict::Failed(e.to_string()));
        }

        let partition = match partition::<S>(&sheet, self.config.row_failure_policy) {
            Ok(partition) => partition,
            Err(e) => return Ok(Verdict::Failed(e.to_string())),
        };
        drop(sheet);

        let mut outcomes = S::persist(&self.writer, partition.candidates).await;
        outcomes.extend(partition.rejected);

        let processed = accepted_count(&outcomes) as i64;
        let report_key = self.publish_report::<S>(&job, outcomes).await;

        Ok(Verdict::Processed {
            processed,
            report_key,
        })
    }

    /// Download the source into a scratch file and parse its first sheet.
    /// `Err` is the message to fail the job with.
    async fn fetch_and_parse(&self, job: &Job) -> Result<Sheet, String> {
        let scratch = scratch_file(&self.config.scratch_dir, "svp-source-", "").map_err(|e| {
            error!(error = %e, "Failed to create scratch file");
            INTERNAL_ERROR_MESSAGE.to_string()
        })?;

        self.blobs
            .get_to_file(&job.source_key, scratch.path())
            .await
            .map_err(|e| {
                error!(error = %e, key = %job.source_key, "Failed to download source file");
                INTERNAL_ERROR_MESSAGE.to_string()
            })?;

        let path = scratch.path().to_path_buf();
        let parsed = tokio::task::spawn_blocking(move || read_workbook(&path)).await;
        drop(scratch);

        match parsed {
            Ok(Ok(sheet)) => Ok(sheet),
            Ok(Err(ParseError::Io(e))) => {
                error!(error = %e, "Failed to read scratch copy of source file");
                Err(INTERNAL_ERROR_MESSAGE.to_string())
            },
            Ok(Err(e)) => {
                if let ParseError::Unreadable { detail } = &e {
                    warn!(detail = %detail, "Spreadsheet could not be read");
                }
                Err(e.to_string())
            },
            Err(e) => {
                error!(error = %e, "Spreadsheet parser task failed");
                Err(INTERNAL_ERROR_MESSAGE.to_string())
            },
        }
    }

    /// Write and upload the report. `None` when any step fails.
    async fn publish_report<S: RowSchema>(
        &self,
        job: &Job,
        outcomes: Vec<Outcome<S::Record>>,
    ) -> Option<String> {
        let scratch = match scratch_file(&self.config.scratch_dir, "svp-report-", ".xlsx") {
            Ok(file) => file,
            Err(e) => {
                error!(error = %e, "Failed to create report scratch file");
                return None;
            },
        };

        let path = scratch.path().to_path_buf();
        let written =
            tokio::task::spawn_blocking(move || write_report::<S>(&outcomes, &path)).await;
        match written {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                error!(error = %e, "Failed to write report");
                return None;
            },
            Err(e) => {
                error!(error = %e, "Report writer task failed");
                return None;
            },
        }

        let key = report_key(job.request_id, &self.config.report_file_name);
        if let Err(e) = self
            .blobs
            .put_file(&key, scratch.path(), XLSX_CONTENT_TYPE)
            .await
        {
            error!(error = %e, key = %key, "Failed to upload report");
            return None;
        }

        Some(key)
    }
}

#[async_trait]
impl JobProcessor for Pipeline {
    async fn process(&self, message: JobMessage) -> Result<RunOutcome, PipelineError> {
        self.run(message).await
    }
}

/// Scratch file that is removed when dropped
fn scratch_file(dir: &Path, prefix: &str, suffix: &str) -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)
}

/// Directory used for scratch files, created on demand
pub fn ensure_scratch_dir(dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    Ok(dir.to_path_buf())
}
