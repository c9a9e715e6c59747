//! Configuration management
//!
//! Everything is read once at startup by [`Config::load`] and handed to the
//! components that need it. Nothing below the binary reads the environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::storage::config::StorageConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/svp";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Queue / Bulk Upload Constants
// ============================================================================

pub const DEFAULT_QUEUE_NAME: &str = "async-file-processing-queue";

/// Maximum number of jobs the worker runs at once.
pub const DEFAULT_QUEUE_PREFETCH: usize = 10;

/// Seconds before an un-acked message becomes deliverable again.
pub const DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 500;

pub const DEFAULT_REPORT_FILE_NAME: &str = "Report.xlsx";

/// 20 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Default lifetime of a worker's claim on a job, in seconds.
pub const DEFAULT_JOB_LEASE_SECS: u64 = 60;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub bulk: BulkConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Message queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub prefetch: usize,
    pub visibility_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

/// What to do with a row whose numeric ids fail to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RowFailurePolicy {
    /// Reject the row and keep going
    #[default]
    Skip,
    /// Fail the whole job at the first bad row
    Abort,
}

impl FromStr for RowFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(RowFailurePolicy::Skip),
            "abort" => Ok(RowFailurePolicy::Abort),
            other => Err(anyhow::anyhow!("Invalid row failure policy: {}", other)),
        }
    }
}

/// Bulk upload pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Directory for scratch copies of uploads, downloads and reports
    pub scratch_dir: PathBuf,
    pub report_file_name: String,
    pub row_failure_policy: RowFailurePolicy,
    pub max_upload_bytes: usize,
    /// How long a worker's claim on a job lasts without renewal
    pub job_lease_secs: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            report_file_name: DEFAULT_REPORT_FILE_NAME.to_string(),
            row_failure_policy: RowFailurePolicy::Skip,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            job_lease_secs: DEFAULT_JOB_LEASE_SECS,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            prefetch: DEFAULT_QUEUE_PREFETCH,
            visibility_timeout_secs: DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_QUEUE_POLL_INTERVAL_MS,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let row_failure_policy = match std::env::var("BULK_ROW_FAILURE_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => RowFailurePolicy::default(),
        };

        let config = Config {
            server: ServerConfig {
                host: std::env::var("SVP_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("SVP_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or("SVP_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true),
            },
            storage: StorageConfig::from_env(),
            queue: QueueConfig {
                name: std::env::var("QUEUE_NAME").unwrap_or_else(|_| DEFAULT_QUEUE_NAME.to_string()),
                prefetch: env_or("QUEUE_PREFETCH", DEFAULT_QUEUE_PREFETCH),
                visibility_timeout_secs: env_or(
                    "QUEUE_VISIBILITY_TIMEOUT_SECS",
                    DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS,
                ),
                poll_interval_ms: env_or("QUEUE_POLL_INTERVAL_MS", DEFAULT_QUEUE_POLL_INTERVAL_MS),
            },
            bulk: BulkConfig {
                scratch_dir: std::env::var("BULK_SCRATCH_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| std::env::temp_dir()),
                report_file_name: std::env::var("BULK_REPORT_FILE_NAME")
                    .unwrap_or_else(|_| DEFAULT_REPORT_FILE_NAME.to_string()),
                row_failure_policy,
                max_upload_bytes: env_or("BULK_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
                job_lease_secs: env_or("BULK_JOB_LEASE_SECS", DEFAULT_JOB_LEASE_SECS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.storage.bucket.is_empty() {
            anyhow::bail!("S3 bucket cannot be empty");
        }

        if self.queue.name.is_empty() {
            anyhow::bail!("Queue name cannot be empty");
        }

        if self.queue.prefetch == 0 {
            anyhow::bail!("Queue prefetch must be greater than 0");
        }

        if self.queue.visibility_timeout_secs == 0 {
            anyhow::bail!("Queue visibility timeout must be greater than 0");
        }

        let report_name = self.bulk.report_file_name.as_str();
        if report_name.is_empty() || report_name.contains('/') {
            anyhow::bail!("Report file name must be a plain file name, got '{}'", report_name);
        }

        if self.bulk.max_upload_bytes == 0 {
            anyhow::bail!("Maximum upload size must be greater than 0");
        }

        if self.bulk.job_lease_secs == 0 {
            anyhow::bail!("Job lease must be greater than 0 seconds");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            bulk: BulkConfig::default(),
        }
    }
}
