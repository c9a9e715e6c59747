//! Asynchronous bulk processing of student and vaccination spreadsheets
//!
//! A job moves through the modules in this order: the [`dispatcher`] takes a
//! message off the queue, the [`pipeline`] downloads the source file, the
//! [`parser`] reads it, [`rows`] splits rows into records and rejections, the
//! [`writer`] persists the records and [`report`] renders the outcomes. The
//! [`tracker`] records every status change in the [`store`].

pub mod dispatcher;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod rows;
pub mod store;
pub mod tracker;
pub mod writer;

pub use dispatcher::{decode, Decision, Dispatcher};
pub use models::{Job, JobMessage, JobPatch, NewJob, Outcome};
pub use pipeline::{JobProcessor, Pipeline, PipelineError, RunOutcome};
pub use store::{JobStore, PgJobStore, StoreError};
pub use writer::BulkWriter;
