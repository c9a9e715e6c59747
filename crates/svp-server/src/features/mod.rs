//! Feature modules implementing the SVP API
//!
//! Each feature is a vertical slice with its own commands, queries and
//! routes:
//! - `commands/` - Write operations
//! - `queries/` - Read operations
//! - `routes.rs` - HTTP route definitions
//!
//! # Features
//!
//! - **bulk_uploads**: spreadsheet submission and job status

pub mod bulk_uploads;

use axum::Router;
use std::sync::Arc;

use crate::bulk::store::JobStore;
use crate::config::BulkConfig;
use crate::queue::MessageQueue;
use crate::storage::BlobStore;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    /// Job record store
    pub jobs: Arc<dyn JobStore>,
    /// Blob store holding uploads and reports
    pub blobs: Arc<dyn BlobStore>,
    /// Queue the worker consumes
    pub queue: Arc<dyn MessageQueue>,
    pub bulk: BulkConfig,
}

/// Creates the API router with all feature routes mounted
///
/// - `/bulk-upload` - Bulk upload submission and status
pub fn router(state: FeatureState) -> Router<()> {
    let max_upload_bytes = state.bulk.max_upload_bytes;

    Router::new().nest(
        "/bulk-upload",
        bulk_uploads::bulk_upload_routes(max_upload_bytes).with_state(state),
    )
}
