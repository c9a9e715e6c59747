//! Job status tracking
//!
//! [`JobTracker`] owns the in-memory view of one job while a worker runs it
//! and is the only path through which the worker writes the job row. It
//! exists only for a worker that won the claim on the job, and every write
//! carries that worker's lease token. Writes are also checked against the
//! status machine and the counter invariants before they reach the store.

use std::sync::Arc;
use std::time::Duration;
use svp_common::JobStatus;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{Job, JobPatch};
use super::store::{JobStore, StoreError};

/// A worker's claim on one job row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub token: Uuid,
    pub ttl: Duration,
}

impl Lease {
    pub fn new(ttl: Duration) -> Self {
        Self {
            token: Uuid::new_v4(),
            ttl,
        }
    }

    /// How often a holder renews, well inside the lease lifetime
    pub fn renew_every(&self) -> Duration {
        (self.ttl / 3).max(Duration::from_millis(1))
    }
}

pub struct JobTracker {
    store: Arc<dyn JobStore>,
    job: Job,
    lease: Lease,
}

impl JobTracker {
    /// Claim `job` for this worker and move it into PROCESSING.
    ///
    /// `None` when the job is no longer claimable: another worker holds a
    /// live lease, or the row finished or vanished since `job` was read. A
    /// PROCESSING job whose lease ran out is a redelivery of an interrupted
    /// run and is resumed.
    pub async fn claim(
        store: Arc<dyn JobStore>,
        job: &Job,
        ttl: Duration,
    ) -> Result<Option<Self>, StoreError> {
        let lease = Lease::new(ttl);
        let Some(claimed) = store.claim(job.request_id, lease.token, ttl).await? else {
            debug!(request_id = %job.request_id, "Job not claimable");
            return Ok(None);
        };

        if job.status == JobStatus::Processing {
            warn!(request_id = %claimed.request_id, "Resuming interrupted job");
        }
        info!(request_id = %claimed.request_id, kind = %claimed.request_type, "Job processing");

        Ok(Some(Self {
            store,
            job: claimed,
            lease,
        }))
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn lease(&self) -> Lease {
        self.lease
    }

    /// Keeps the lease alive until renewal fails, then returns why.
    /// Never completes while this worker still owns the job.
    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            store: self.store.clone(),
            id: self.job.id,
            lease: self.lease,
        }
    }

    /// Validate `patch` against the current snapshot, persist it and refresh
    /// the snapshot from the stored row
    pub async fn apply(&mut self, patch: JobPatch) -> Result<&Job, StoreError> {
        if patch.is_empty() {
            return Ok(&self.job);
        }
        self.check(&patch)?;

        let updated = self
            .store
            .update(self.job.id, self.lease.token, &patch)
            .await?;
        debug!(
            request_id = %updated.request_id,
            status = %updated.status,
            total_records = updated.total_records,
            processed_records = updated.processed_records,
            "Job updated"
        );
        self.job = updated;
        Ok(&self.job)
    }

    fn check(&self, patch: &JobPatch) -> Result<(), StoreError> {
        let request_id = self.job.request_id;

        if let Some(next) = patch.status {
            if !self.job.status.can_transition_to(next) {
                return Err(StoreError::IllegalTransition {
                    request_id,
                    from: self.job.status,
                    to: next,
                });
            }
        }

        let total = patch.total_records.unwrap_or(self.job.total_records);
        let processed = patch.processed_records.unwrap_or(self.job.processed_records);

        if total < self.job.total_records {
            return Err(StoreError::InvalidCounts {
                request_id,
                reason: format!(
                    "total_records cannot decrease from {} to {}",
                    self.job.total_records, total
                ),
            });
        }
        if processed < 0 || processed > total {
            return Err(StoreError::InvalidCounts {
                request_id,
                reason: format!("processed_records {} outside 0..={}", processed, total),
            });
        }

        Ok(())
    }

    pub async fn record_total(&mut self, total_records: i64) -> Result<(), StoreError> {
        self.apply(JobPatch::default().with_total_records(total_records)).await?;
        Ok(())
    }

    pub async fn fail(&mut self, message: impl Into<String>) -> Result<(), StoreError> {
        let message = message.into();
        self.apply(JobPatch::status(JobStatus::Failed).with_error(message.clone()))
            .await?;
        warn!(request_id = %self.job.request_id, error = %message, "Job failed");
        Ok(())
    }

    /// Mark the job PROCESSED. `report_key` is `None` when the report could
    /// not be produced, in which case `report_error` is recorded instead.
    pub async fn complete(
        &mut self,
        processed_records: i64,
        report_key: Option<String>,
        report_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut patch =
            JobPatch::status(JobStatus::Processed).with_processed_records(processed_records);
        if let Some(key) = report_key {
            patch = patch.with_report_key(key);
        }
        patch = match report_error {
            Some(message) => patch.with_error(message),
            None => patch.clear_error(),
        };

        self.apply(patch).await?;
        info!(
            request_id = %self.job.request_id,
            total_records = self.job.total_records,
            processed_records = self.job.processed_records,
            "Job processed"
        );
        Ok(())
    }
}

/// Renews one lease on a fixed interval
pub struct Heartbeat {
    store: Arc<dyn JobStore>,
    id: i64,
    lease: Lease,
}

impl Heartbeat {
    pub async fn run(self) -> StoreError {
        let mut ticker = tokio::time::interval(self.lease.renew_every());
        // The first tick is immediate and the claim just set the expiry
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.store.renew(self.id, self.lease.token, self.lease.ttl).await {
                warn!(job_id = self.id, error = %e, "Failed to renew job lease");
                return e;
            }
        }
    }
}
