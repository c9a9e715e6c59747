pub mod list;

pub use list::{BulkUploadItem, ListBulkUploadsError, ListBulkUploadsQuery, ListBulkUploadsResponse};
