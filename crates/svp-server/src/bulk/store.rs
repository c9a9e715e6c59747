//! Job record store
//!
//! Persists and queries rows of the `bulk_file_jobs` table.
//!
//! A worker takes a job with [`JobStore::claim`], which hands out a lease
//! token. The claim is a single conditional `UPDATE`, so of two workers
//! racing for the same job only one gets it. Every later write names the
//! token and only lands while that token still holds a PROCESSING row. A
//! PROCESSING job can be claimed again once its lease has run out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use svp_common::{JobStatus, Pagination};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use super::models::{Job, JobPatch, NewJob};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job store database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Corrupt job row {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("Illegal status transition for job {request_id}: {from} -> {to}")]
    IllegalTransition {
        request_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Invalid record counts for job {request_id}: {reason}")]
    InvalidCounts { request_id: Uuid, reason: String },

    #[error("Lost the lease on job {id}")]
    LeaseLost { id: i64 },

    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, request_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Move a PENDING job, or a PROCESSING job whose lease has expired, to
    /// PROCESSING under `token` for `ttl`. `None` when the job is missing,
    /// terminal or leased to another worker.
    async fn claim(
        &self,
        request_id: Uuid,
        token: Uuid,
        ttl: Duration,
    ) -> Result<Option<Job>, StoreError>;

    /// Push the lease held by `token` out to `ttl` from now
    async fn renew(&self, id: i64, token: Uuid, ttl: Duration) -> Result<(), StoreError>;

    /// Apply `patch` to the PROCESSING row with surrogate key `id` leased by
    /// `token` and return the updated row
    async fn update(&self, id: i64, token: Uuid, patch: &JobPatch) -> Result<Job, StoreError>;

    /// Newest first, optionally restricted to a single request id
    async fn list(&self, request_id: Option<Uuid>, page: Pagination)
        -> Result<Vec<Job>, StoreError>;

    async fn count(&self, request_id: Option<Uuid>) -> Result<i64, StoreError>;
}

const JOB_COLUMNS: &str = "id, request_id, request_type, status, file_name, source_key, \
     report_key, total_records, processed_records, error_message, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    request_id: Uuid,
    request_type: String,
    status: String,
    file_name: String,
    source_key: String,
    report_key: Option<String>,
    total_records: i64,
    processed_records: i64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |e: svp_common::SvpError| StoreError::Corrupt {
            id: row.id,
            reason: e.to_string(),
        };
        let request_type = row.request_type.parse().map_err(corrupt)?;
        let status = row.status.parse().map_err(corrupt)?;

        Ok(Job {
            id: row.id,
            request_id: row.request_id,
            request_type,
            status,
            file_name: row.file_name,
            source_key: row.source_key,
            report_key: row.report_key,
            total_records: row.total_records,
            processed_records: row.processed_records,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(request_id = %job.request_id))]
    async fn create(&self, job: NewJob) -> Result<Job, StoreError> {
        let sql = format!(
            "INSERT INTO bulk_file_jobs (request_id, request_type, status, file_name, source_key) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            JOB_COLUMNS
        );
        let row: JobRow = sqlx::query_as(&sql)
            .bind(job.request_id)
            .bind(job.request_type.as_str())
            .bind(JobStatus::Pending.as_str())
            .bind(&job.file_name)
            .bind(&job.source_key)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn get(&self, request_id: Uuid) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {} FROM bulk_file_jobs WHERE request_id = $1", JOB_COLUMNS);
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn claim(
        &self,
        request_id: Uuid,
        token: Uuid,
        ttl: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            "UPDATE bulk_file_jobs \
             SET status = $2, lease_token = $3, \
                 lease_expires_at = NOW() + ($4::BIGINT * INTERVAL '1 millisecond'), \
                 updated_at = NOW() \
             WHERE request_id = $1 \
               AND (status = $5 \
                    OR (status = $2 AND (lease_expires_at IS NULL OR lease_expires_at <= NOW()))) \
             RETURNING {}",
            JOB_COLUMNS
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(request_id)
            .bind(JobStatus::Processing.as_str())
            .bind(token)
            .bind(ttl.as_millis() as i64)
            .bind(JobStatus::Pending.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn renew(&self, id: i64, token: Uuid, ttl: Duration) -> Result<(), StoreError> {
        let renewed = sqlx::query(
            r#"
            UPDATE bulk_file_jobs
            SET lease_expires_at = NOW() + ($3::BIGINT * INTERVAL '1 millisecond')
            WHERE id = $1 AND lease_token = $2 AND status = $4
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(ttl.as_millis() as i64)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if renewed == 0 {
            return Err(StoreError::LeaseLost { id });
        }
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, id: i64, token: Uuid, patch: &JobPatch) -> Result<Job, StoreError> {
        let mut query = QueryBuilder::<Postgres>::new("UPDATE bulk_file_jobs SET updated_at = NOW()");

        if let Some(status) = patch.status {
            query.push(", status = ").push_bind(status.as_str());
        }
        if let Some(ref report_key) = patch.report_key {
            query.push(", report_key = ").push_bind(report_key.clone());
        }
        if let Some(total) = patch.total_records {
            query.push(", total_records = ").push_bind(total);
        }
        if let Some(processed) = patch.processed_records {
            query.push(", processed_records = ").push_bind(processed);
        }
        if let Some(ref error_message) = patch.error_message {
            query.push(", error_message = ").push_bind(error_message.clone());
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(" AND lease_token = ").push_bind(token);
        query
            .push(" AND status = ")
            .push_bind(JobStatus::Processing.as_str());
        query.push(" RETURNING ").push(JOB_COLUMNS);

        let row: Option<JobRow> = query.build_query_as::<JobRow>().fetch_optional(&self.pool).await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM bulk_file_jobs WHERE id = $1)")
                        .bind(id)
                        .fetch_one(&self.pool)
                        .await?;
                if exists {
                    Err(StoreError::LeaseLost { id })
                } else {
                    Err(StoreError::NotFound(id.to_string()))
                }
            },
        }
    }

    async fn list(
        &self,
        request_id: Option<Uuid>,
        page: Pagination,
    ) -> Result<Vec<Job>, StoreError> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT ");
        query.push(JOB_COLUMNS).push(" FROM bulk_file_jobs");

        if let Some(request_id) = request_id {
            query.push(" WHERE request_id = ").push_bind(request_id);
        }

        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);

        let rows: Vec<JobRow> = query.build_query_as::<JobRow>().fetch_all(&self.pool).await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count(&self, request_id: Option<Uuid>) -> Result<i64, StoreError> {
        let count: i64 = match request_id {
            Some(request_id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM bulk_file_jobs WHERE request_id = $1")
                    .bind(request_id)
                    .fetch_one(&self.pool)
                    .await?
            },
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM bulk_file_jobs")
                    .fetch_one(&self.pool)
                    .await?
            },
        };

        Ok(count)
    }
}
