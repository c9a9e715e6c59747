//! Record collaborators used by the bulk writer
//!
//! Students, vaccination drives and student vaccination records live in
//! `student_management`, `vaccination_inventory` and
//! `student_vaccination_records`. Only the columns the bulk pipeline needs are
//! touched here.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::bulk::models::{StudentRecord, VaccinationRecord};

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    Rejected(String),
}

impl RecordError {
    /// Map unique and foreign-key violations to readable rejections
    fn from_insert(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return RecordError::Duplicate(format!("{} already exists", what));
            }
            if db_err.is_foreign_key_violation() {
                return RecordError::Rejected(format!("{} references a missing row", what));
            }
        }
        RecordError::Database(err)
    }
}

#[async_trait]
pub trait StudentRepository: Send + Sync {
    /// Insert a student and return its id
    async fn create_student(&self, record: &StudentRecord) -> Result<i64, RecordError>;

    async fn student_exists(&self, student_id: i64) -> Result<bool, RecordError>;
}

#[async_trait]
pub trait VaccinationRepository: Send + Sync {
    /// Insert a student vaccination record and return its id
    async fn create_vaccination_record(
        &self,
        record: &VaccinationRecord,
    ) -> Result<i64, RecordError>;
}

#[async_trait]
pub trait DriveDirectory: Send + Sync {
    async fn drive_exists(&self, drive_id: i64) -> Result<bool, RecordError>;
}

/// PostgreSQL implementation of every record collaborator
#[derive(Clone)]
pub struct PgRecords {
    pool: PgPool,
}

impl PgRecords {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StudentRepository for PgRecords {
    async fn create_student(&self, record: &StudentRecord) -> Result<i64, RecordError> {
        sqlx::query_scalar(
            r#"
            INSERT INTO student_management (name, class, gender, roll_number, phone_no)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&record.name)
        .bind(record.class.trim())
        .bind(&record.gender)
        .bind(&record.roll_number)
        .bind(&record.phone_no)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            RecordError::from_insert(
                e,
                &format!("student with roll number {} in class {}", record.roll_number, record.class),
            )
        })
    }

    async fn student_exists(&self, student_id: i64) -> Result<bool, RecordError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM student_management WHERE id = $1)")
                .bind(student_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl VaccinationRepository for PgRecords {
    async fn create_vaccination_record(
        &self,
        record: &VaccinationRecord,
    ) -> Result<i64, RecordError> {
        sqlx::query_scalar(
            r#"
            INSERT INTO student_vaccination_records (student_id, drive_id)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(record.student_id)
        .bind(record.drive_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            RecordError::from_insert(
                e,
                &format!(
                    "vaccination of student {} in drive {}",
                    record.student_id, record.drive_id
                ),
            )
        })
    }
}

#[async_trait]
impl DriveDirectory for PgRecords {
    async fn drive_exists(&self, drive_id: i64) -> Result<bool, RecordError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM vaccination_inventory WHERE id = $1)")
                .bind(drive_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}
