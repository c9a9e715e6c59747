//! List bulk uploads query
//!
//! Pages through jobs newest first, optionally narrowed to one request id.
//! Finished jobs that published a report carry a time-limited download link.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use svp_common::{JobStatus, Pagination};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::bulk::models::Job;
use crate::bulk::store::StoreError;
use crate::features::FeatureState;

/// Lifetime of a presigned report link
pub const REPORT_URL_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListBulkUploadsQuery {
    #[serde(skip)]
    pub request_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkUploadItem {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListBulkUploadsResponse {
    pub jobs: Vec<BulkUploadItem>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Error)]
pub enum ListBulkUploadsError {
    #[error("Bulk upload {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[tracing::instrument(skip(state))]
pub async fn handle(
    state: FeatureState,
    query: ListBulkUploadsQuery,
) -> Result<ListBulkUploadsResponse, ListBulkUploadsError> {
    let page = Pagination::new(query.limit, query.offset);

    let total = state.jobs.count(query.request_id).await?;
    if let Some(request_id) = query.request_id {
        if total == 0 {
            return Err(ListBulkUploadsError::NotFound(request_id));
        }
    }

    let jobs = state.jobs.list(query.request_id, page).await?;

    let mut items = Vec::with_capacity(jobs.len());
    for job in jobs {
        let report_url = report_url(&state, &job).await;
        items.push(BulkUploadItem { job, report_url });
    }

    Ok(ListBulkUploadsResponse {
        jobs: items,
        total,
        limit: page.limit,
        offset: page.offset,
    })
}

async fn report_url(state: &FeatureState, job: &Job) -> Option<String> {
    if job.status != JobStatus::Processed {
        return None;
    }
    let key = job.report_key.as_deref()?;

    match state.blobs.presigned_url(key, REPORT_URL_TTL).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(request_id = %job.request_id, error = %e, "Failed to presign report URL");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use svp_common::JobKind;

    #[test]
    fn test_query_deserializes_without_request_id() {
        let query: ListBulkUploadsQuery =
            serde_json::from_value(serde_json::json!({"limit": 5})).unwrap();
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.offset, None);
        assert!(query.request_id.is_none());
    }

    #[test]
    fn test_item_flattens_job() {
        let item = BulkUploadItem {
            job: Job {
                id: 3,
                request_id: Uuid::nil(),
                request_type: JobKind::StudentRecord,
                status: JobStatus::Processed,
                file_name: "students.xlsx".to_string(),
                source_key: "uploads/0/students.xlsx".to_string(),
                report_key: Some("reports/0/Report.xlsx".to_string()),
                total_records: 4,
                processed_records: 3,
                error_message: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            report_url: Some("https://blob/report".to_string()),
        };

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["request_type"], "STUDENT_RECORD");
        assert_eq!(value["status"], "PROCESSED");
        assert_eq!(value["total_records"], 4);
        assert_eq!(value["report_url"], "https://blob/report");
    }
}
