//! Queue consumer
//!
//! Pulls deliveries from the job queue, decodes them and runs each one as its
//! own task. At most `prefetch` deliveries are in flight at any time. A
//! delivery is acknowledged only once its job is settled; a task that errors
//! or panics leaves the delivery unacknowledged, so the queue hands it out
//! again after the visibility timeout. So does a job another worker holds the
//! lease on: the next delivery finds it finished or its lease expired.

use std::sync::Arc;
use std::time::Duration;
use svp_common::JobKind;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::models::JobMessage;
use super::pipeline::{JobProcessor, PipelineError, RunOutcome};
use crate::config::QueueConfig;
use crate::queue::{Delivery, MessageQueue};

/// What to do with a raw delivery body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Process(JobMessage),
    /// Not a job descriptor at all
    Malformed(String),
    /// A descriptor whose `request_type` names no known job kind
    UnknownKind(String),
}

/// Decode a delivery body into a [`Decision`]
pub fn decode(body: &str) -> Decision {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => return Decision::Malformed(e.to_string()),
    };

    if let Some(kind) = value.get("request_type").and_then(|v| v.as_str()) {
        if kind.parse::<JobKind>().is_err() {
            return Decision::UnknownKind(kind.to_string());
        }
    }

    match serde_json::from_value::<JobMessage>(value) {
        Ok(message) => Decision::Process(message),
        Err(e) => Decision::Malformed(e.to_string()),
    }
}

type TaskResult = (i64, Result<Result<RunOutcome, PipelineError>, JoinError>);

pub struct Dispatcher {
    queue: Arc<dyn MessageQueue>,
    processor: Arc<dyn JobProcessor>,
    prefetch: usize,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        processor: Arc<dyn JobProcessor>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            prefetch: config.prefetch.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Consume until `shutdown` flips to `true` or its sender is dropped,
    /// then wait for in-flight tasks to settle.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut in_flight: JoinSet<TaskResult> = JoinSet::new();
        info!(prefetch = self.prefetch, "Dispatcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if in_flight.len() >= self.prefetch {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    },
                    Some(joined) = in_flight.join_next() => self.settle(joined).await,
                }
                continue;
            }

            let capacity = self.prefetch - in_flight.len();
            match self.queue.receive(capacity).await {
                Ok(deliveries) if !deliveries.is_empty() => {
                    debug!(count = deliveries.len(), "Received deliveries");
                    for delivery in deliveries {
                        self.dispatch(delivery, &mut in_flight).await;
                    }
                    continue;
                },
                Ok(_) => {},
                Err(e) => error!(error = %e, "Failed to receive from queue"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.settle(joined).await
                },
                _ = tokio::time::sleep(self.poll_interval) => {},
            }
        }

        info!(in_flight = in_flight.len(), "Dispatcher stopping, waiting for running jobs");
        while let Some(joined) = in_flight.join_next().await {
            self.settle(joined).await;
        }
        info!("Dispatcher stopped");
    }

    async fn dispatch(&self, delivery: Delivery, in_flight: &mut JoinSet<TaskResult>) {
        let message = match decode(&delivery.body) {
            Decision::Process(message) => message,
            Decision::Malformed(detail) => {
                warn!(delivery_id = delivery.id, detail = %detail, "Discarding malformed message");
                self.ack(delivery.id).await;
                return;
            },
            Decision::UnknownKind(kind) => {
                warn!(delivery_id = delivery.id, kind = %kind, "Discarding message of unknown job kind");
                self.ack(delivery.id).await;
                return;
            },
        };

        debug!(
            delivery_id = delivery.id,
            attempts = delivery.attempts,
            request_id = %message.request_id,
            "Dispatching job"
        );

        let processor = self.processor.clone();
        let delivery_id = delivery.id;
        in_flight.spawn(async move {
            // The inner task turns a panic into a JoinError tied to this delivery
            let result = tokio::spawn(async move { processor.process(message).await }).await;
            (delivery_id, result)
        });
    }

    async fn settle(&self, joined: Result<TaskResult, JoinError>) {
        match joined {
            Ok((delivery_id, Ok(Ok(RunOutcome::Busy)))) => {
                info!(delivery_id, "Job leased to another worker, leaving message for redelivery");
            },
            Ok((delivery_id, Ok(Ok(outcome)))) => {
                debug!(delivery_id, ?outcome, "Job settled");
                self.ack(delivery_id).await;
            },
            Ok((delivery_id, Ok(Err(e)))) => {
                warn!(delivery_id, error = %e, "Job not settled, leaving message for redelivery");
            },
            Ok((delivery_id, Err(e))) => {
                error!(delivery_id, error = %e, "Job task panicked, leaving message for redelivery");
            },
            Err(e) => error!(error = %e, "Dispatcher task failed"),
        }
    }

    async fn ack(&self, delivery_id: i64) {
        if let Err(e) = self.queue.ack(delivery_id).await {
            error!(delivery_id, error = %e, "Failed to acknowledge message");
        }
    }
}
