//! Durable job queue
//!
//! Messages live in the `queue_messages` table until acknowledged. A consumer
//! claims ready rows with `FOR UPDATE SKIP LOCKED` and pushes their
//! `visible_at` forward by the visibility timeout, so concurrent consumers
//! never see the same message while it is in flight. A message that is not
//! acknowledged before the timeout runs out is delivered again.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::QueueConfig;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// A message handed to a consumer, pending acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Delivery {
    pub id: i64,
    pub body: String,
    /// Number of times this message has been delivered, including this one
    pub attempts: i32,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue a message body for durable delivery
    async fn publish(&self, body: &str) -> Result<(), QueueError>;

    /// Claim up to `max` ready messages, oldest first
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError>;

    /// Remove a delivered message for good
    async fn ack(&self, delivery_id: i64) -> Result<(), QueueError>;
}

#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    name: String,
    visibility_timeout: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool, config: &QueueConfig) -> Self {
        Self {
            pool,
            name: config.name.clone(),
            visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl MessageQueue for PgQueue {
    #[instrument(skip(self, body), fields(queue = %self.name))]
    async fn publish(&self, body: &str) -> Result<(), QueueError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO queue_messages (queue_name, body)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(&self.name)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;

        debug!(message_id = id, "Message published");
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let mut deliveries: Vec<Delivery> = sqlx::query_as(
            r#"
            UPDATE queue_messages
            SET visible_at = NOW() + ($3::BIGINT * INTERVAL '1 second'),
                attempts = attempts + 1
            WHERE id IN (
                SELECT id
                FROM queue_messages
                WHERE queue_name = $1 AND visible_at <= NOW()
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, body, attempts
            "#,
        )
        .bind(&self.name)
        .bind(max as i64)
        .bind(self.visibility_timeout.as_secs() as i64)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING does not preserve the subquery order
        deliveries.sort_by_key(|d| d.id);
        Ok(deliveries)
    }

    async fn ack(&self, delivery_id: i64) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND queue_name = $2")
            .bind(delivery_id)
            .bind(&self.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
