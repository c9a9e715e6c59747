//! Submit bulk upload command
//!
//! Stores the uploaded file, records a PENDING job and enqueues it. The file
//! is not inspected here; signature and layout checks belong to the worker.

use serde::{Deserialize, Serialize};
use svp_common::{JobKind, JobStatus};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::bulk::models::{JobMessage, NewJob};
use crate::bulk::store::StoreError;
use crate::features::FeatureState;
use crate::queue::QueueError;
use crate::storage::{base_file_name, upload_key, XLSX_CONTENT_TYPE};

const XLS_CONTENT_TYPE: &str = "application/vnd.ms-excel";
const OCTET_STREAM: &str = "application/octet-stream";

pub const MAX_FILE_NAME_LENGTH: usize = 255;

#[derive(Debug, Clone)]
pub struct SubmitBulkUploadCommand {
    pub kind: JobKind,
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitBulkUploadResponse {
    pub request_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("file not received")]
    FileMissing,
    #[error("File is empty")]
    FileEmpty,
    #[error("File name is required and cannot be empty")]
    FileNameRequired,
    #[error("File name must not exceed {} characters", MAX_FILE_NAME_LENGTH)]
    FileNameLength,
    #[error("File exceeds the maximum upload size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
    #[error("Failed to stage upload: {0}")]
    Scratch(#[source] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("Failed to encode job message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SubmitError {
    /// True for problems with the request rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SubmitError::FileMissing
                | SubmitError::FileEmpty
                | SubmitError::FileNameRequired
                | SubmitError::FileNameLength
                | SubmitError::TooLarge { .. }
        )
    }
}

impl SubmitBulkUploadCommand {
    pub fn validate(&self, max_upload_bytes: usize) -> Result<(), SubmitError> {
        let name = base_file_name(&self.file_name);
        if name.is_empty() {
            return Err(SubmitError::FileNameRequired);
        }
        if name.chars().count() > MAX_FILE_NAME_LENGTH {
            return Err(SubmitError::FileNameLength);
        }
        if self.content.is_empty() {
            return Err(SubmitError::FileEmpty);
        }
        if self.content.len() > max_upload_bytes {
            return Err(SubmitError::TooLarge {
                max_bytes: max_upload_bytes,
            });
        }
        Ok(())
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".xlsx") {
        XLSX_CONTENT_TYPE
    } else if lower.ends_with(".xls") {
        XLS_CONTENT_TYPE
    } else {
        OCTET_STREAM
    }
}

#[tracing::instrument(
    skip(state, command),
    fields(kind = %command.kind, file_name = %command.file_name, size = command.content.len())
)]
pub async fn handle(
    state: FeatureState,
    command: SubmitBulkUploadCommand,
) -> Result<SubmitBulkUploadResponse, SubmitError> {
    command.validate(state.bulk.max_upload_bytes)?;

    let file_name = base_file_name(&command.file_name).to_string();
    let request_id = Uuid::new_v4();
    let source_key = upload_key(request_id, &file_name);

    let scratch = tempfile::Builder::new()
        .prefix("svp-upload-")
        .tempfile_in(&state.bulk.scratch_dir)
        .map_err(SubmitError::Scratch)?;
    tokio::fs::write(scratch.path(), &command.content)
        .await
        .map_err(SubmitError::Scratch)?;

    state
        .blobs
        .put_file(&source_key, scratch.path(), content_type_for(&file_name))
        .await
        .map_err(SubmitError::Storage)?;
    drop(scratch);

    let job = state
        .jobs
        .create(NewJob {
            request_id,
            request_type: command.kind,
            file_name,
            source_key,
        })
        .await?;

    let body = serde_json::to_string(&JobMessage::from(&job))?;
    state.queue.publish(&body).await?;

    info!(request_id = %job.request_id, job_id = job.id, "Bulk upload accepted");

    Ok(SubmitBulkUploadResponse {
        request_id: job.request_id,
        status: job.status,
    })
}
