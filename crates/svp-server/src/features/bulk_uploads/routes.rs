use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use svp_common::JobKind;
use uuid::Uuid;

use super::{
    commands::{SubmitBulkUploadCommand, SubmitError},
    queries::ListBulkUploadsQuery,
};
use crate::api::response::ApiResponse;
use crate::error::{ApiResult, AppError};
use crate::features::FeatureState;

/// Multipart field carrying the spreadsheet
pub const FILE_FIELD: &str = "file";

/// Room for multipart framing on top of the file itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn bulk_upload_routes(max_upload_bytes: usize) -> Router<FeatureState> {
    Router::new()
        .route("/", get(list_bulk_uploads))
        .route("/students", post(submit_students))
        .route("/vaccine-records", post(submit_vaccine_records))
        .route("/:request_id", get(get_bulk_upload))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
        ))
}

#[tracing::instrument(skip(state, multipart))]
async fn submit_students(
    State(state): State<FeatureState>,
    multipart: Multipart,
) -> ApiResult<Response> {
    submit(state, JobKind::StudentRecord, multipart).await
}

#[tracing::instrument(skip(state, multipart))]
async fn submit_vaccine_records(
    State(state): State<FeatureState>,
    multipart: Multipart,
) -> ApiResult<Response> {
    submit(state, JobKind::VaccineRecord, multipart).await
}

/// A body cut off by the size limit is 413; any other framing problem is 400
fn multipart_error(err: MultipartError, context: &str, max_bytes: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { max_bytes }
    } else {
        AppError::BadRequest(format!("{}: {}", context, err))
    }
}

async fn submit(state: FeatureState, kind: JobKind, mut multipart: Multipart) -> ApiResult<Response> {
    let max_bytes = state.bulk.max_upload_bytes;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "Failed to read multipart field", max_bytes))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, "Failed to read file bytes", max_bytes))?;
        upload = Some((file_name, data.to_vec()));
    }

    let (file_name, content) = upload.ok_or(SubmitError::FileMissing)?;

    let command = SubmitBulkUploadCommand {
        kind,
        file_name,
        content,
    };
    let response = super::commands::submit::handle(state, command).await?;

    Ok(ApiResponse::success(response).with_status(StatusCode::ACCEPTED))
}

#[tracing::instrument(skip(state))]
async fn list_bulk_uploads(
    State(state): State<FeatureState>,
    Query(query): Query<ListBulkUploadsQuery>,
) -> ApiResult<Response> {
    let response = super::queries::list::handle(state, query).await?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state))]
async fn get_bulk_upload(
    State(state): State<FeatureState>,
    Path(request_id): Path<String>,
    Query(query): Query<ListBulkUploadsQuery>,
) -> ApiResult<Response> {
    let request_id = Uuid::parse_str(request_id.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid request_id: {}", request_id)))?;
    let query = ListBulkUploadsQuery {
        request_id: Some(request_id),
        ..query
    };

    let response = super::queries::list::handle(state, query).await?;
    Ok(ApiResponse::success(response).into_response())
}
