pub mod submit;

pub use submit::{SubmitBulkUploadCommand, SubmitBulkUploadResponse, SubmitError};
