//! SVP Server Library
//!
//! Bulk upload service for the school vaccination portal.
//!
//! # Overview
//!
//! Staff upload a spreadsheet of students or of student vaccination
//! assignments. The HTTP front door stores the file, records a PENDING job
//! and enqueues it; a worker later validates and parses the file, persists
//! every row it can, and publishes a per-row result report.
//!
//! - **API Endpoints**: submission and job status under `/api/v1/bulk-upload`
//! - **Database**: PostgreSQL via SQLx for jobs, the queue and records
//! - **Storage Backend**: S3-compatible object storage for uploads and reports
//! - **Configuration**: environment-based, loaded once at startup
//!
//! # Architecture
//!
//! HTTP handlers live in feature slices (`features/<name>/{commands,queries}`).
//! The worker side lives in [`bulk`]: a [`bulk::Dispatcher`] pulls messages
//! from the [`queue`] and hands each to a [`bulk::Pipeline`] task. Every
//! collaborator sits behind a trait ([`bulk::JobStore`],
//! [`storage::BlobStore`], [`queue::MessageQueue`] and the record
//! repositories in [`records`]) so the pipeline can be driven in memory.

pub mod api;
pub mod bulk;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod middleware;
pub mod queue;
pub mod records;
pub mod storage;

// Re-export commonly used types
pub use error::{ApiResult, AppError};
