//! SVP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the school vaccination portal
//! bulk upload pipeline.
//!
//! # Overview
//!
//! - **Logging**: tracing subscriber setup shared by the server and worker
//! - **Error Handling**: common error type for wire-level parsing
//! - **Types**: job kinds, job statuses and pagination
//!
//! # Example
//!
//! ```no_run
//! use svp_common::types::{JobKind, JobStatus};
//!
//! let kind: JobKind = "STUDENT_RECORD".parse().unwrap();
//! assert_eq!(kind.expected_width(), 5);
//! assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SvpError};
pub use types::{JobKind, JobStatus, Pagination};
