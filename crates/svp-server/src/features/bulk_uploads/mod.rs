//! Bulk upload feature
//!
//! Accepts student and vaccination spreadsheets for asynchronous processing
//! and reports job progress.

pub mod commands;
pub mod queries;
pub mod routes;

pub use commands::{SubmitBulkUploadCommand, SubmitBulkUploadResponse, SubmitError};
pub use queries::{BulkUploadItem, ListBulkUploadsError, ListBulkUploadsQuery, ListBulkUploadsResponse};
pub use routes::bulk_upload_routes;
