//! Object storage for source uploads and generated reports
//!
//! [`BlobStore`] is the seam the bulk pipeline talks to; [`Storage`] is the
//! S3/MinIO implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub mod config;

pub const UPLOADS_PREFIX: &str = "uploads";
pub const REPORTS_PREFIX: &str = "reports";

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Key of an uploaded source file: `uploads/<request_id>/<file_name>`
pub fn upload_key(request_id: Uuid, file_name: &str) -> String {
    format!("{}/{}/{}", UPLOADS_PREFIX, request_id, file_name)
}

/// Key of a generated report: `reports/<request_id>/<report_file_name>`
pub fn report_key(request_id: Uuid, report_file_name: &str) -> String {
    format!("{}/{}/{}", REPORTS_PREFIX, request_id, report_file_name)
}

/// Reduce a client supplied file name to its final path component.
///
/// Both separators are stripped since browsers on Windows may send a full path.
pub fn base_file_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim()
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a local file under `key`
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()>;

    /// Stream the object at `key` into the local file at `dest`
    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()>;

    /// Time-limited download URL for `key`
    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub async fn new(config: config::StorageConfig) -> Result<Self> {
        debug!(
            endpoint = ?config.endpoint,
            region = %config.region,
            path_style = config.path_style,
            "Initializing storage"
        );

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "svp-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(bucket = %config.bucket, "Storage client initialized");

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStore for Storage {
    #[instrument(skip(self, path))]
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to open {} for upload", path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to upload to S3: {}", key))?;

        info!("Uploaded s3://{}/{}", self.bucket, key);

        Ok(())
    }

    #[instrument(skip(self, dest))]
    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download from S3: {}", key))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut body = response.body;
        let mut written = 0usize;
        while let Some(chunk) = body
            .try_next()
            .await
            .context("Failed to read S3 response body")?
        {
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!("Downloaded {} bytes from s3://{}/{}", written, self.bucket, key);

        Ok(())
    }

    #[instrument(skip(self))]
    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .context("Failed to create presigning config")?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        Ok(presigned_request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            upload_key(id, "students.xlsx"),
            "uploads/00000000-0000-0000-0000-000000000000/students.xlsx"
        );
        assert_eq!(
            report_key(id, "Report.xlsx"),
            "reports/00000000-0000-0000-0000-000000000000/Report.xlsx"
        );
    }

    #[test]
    fn test_base_file_name_strips_directories() {
        assert_eq!(base_file_name("students.xlsx"), "students.xlsx");
        assert_eq!(base_file_name("../../etc/students.xlsx"), "students.xlsx");
        assert_eq!(base_file_name("C:\\Users\\nurse\\drive.xls"), "drive.xls");
        assert_eq!(base_file_name("dir/"), "");
    }
}
