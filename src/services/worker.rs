use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};
use strum::{Display, IntoStaticStr};
use tokio::sync::watch;
use uuid::Uuid;

use crate::db::{JobStore, OrderStore};
use crate::handlers::{self, HandlerError, HandlerOutcome};
use crate::models::job::{Job, JobPayload, JobType, ResultState, Status};
use crate::models::queue_item::QueueItem;
use crate::services::broker::{self, BrokerError, MessageBroker, QueueName};

const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(200);

/// How one message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    /// Handler reported success; result is present.
    Succeeded,
    /// Handler ran and reported failure.
    Failed,
    /// No handler exists for the job; nothing ran and nothing was dead-lettered.
    Rejected,
    /// Handler errored; a copy went to LOST_ITEM.
    DeadLettered,
    /// Handler exceeded the deadline; a copy went to LOST_ITEM.
    TimedOut,
    /// Body was not a valid queue item; dropped without touching any row.
    Dropped,
}

/// Consumes one queue and drives each task from received to finished.
pub struct Worker {
    store: Arc<dyn JobStore>,
    orders: Arc<dyn OrderStore>,
    broker: Arc<dyn MessageBroker>,
    exchange: String,
    handler_timeout: Option<Duration>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        orders: Arc<dyn OrderStore>,
        broker: Arc<dyn MessageBroker>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            store,
            orders,
            broker,
            exchange: exchange.into(),
            handler_timeout: None,
        }
    }

    /// Abandon handlers that run longer than `timeout`.
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Consume `queue` one message at a time until `shutdown` is set.
    ///
    /// A transient broker failure puts the current message back and
    /// resubscribes. Returns an error only for broker failures the
    /// connection layer could not recover from.
    pub async fn run(
        &self,
        queue: QueueName,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        loop {
            let mut consumer = self.broker.consumer(queue).await?;
            tracing::info!(queue = %queue, "Worker consuming");

            let consumed = broker::consume(consumer.as_mut(), shutdown.clone(), |body| async move {
                self.process(queue, &body).await.map(|_| ())
            })
            .await;
            drop(consumer);

            match consumed {
                Ok(()) => break,
                Err(e) if e.is_transient() => {
                    tracing::warn!(queue = %queue, error = %e, "Broker hiccup, resubscribing");
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(queue = %queue, "Worker stopped");
        Ok(())
    }

    /// Process one message body. The caller acks afterwards regardless of
    /// the outcome; an `Err` means the message must stay unacked.
    pub async fn process(&self, queue: QueueName, body: &[u8]) -> Result<Outcome, WorkerError> {
        let item = match QueueItem::from_bytes(body) {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(queue = %queue, error = %e, bytes = body.len(), "Dropping malformed message");
                record(queue, Outcome::Dropped);
                return Ok(Outcome::Dropped);
            }
        };
        let QueueItem {
            job,
            mut task,
            mut result,
        } = item;

        tracing::info!(
            queue = %queue,
            job_id = %job.id,
            task_id = %task.id,
            job_type = %job.job_type,
            "Processing task"
        );

        task.status = Status::pending();
        task.started_at = Some(Utc::now());
        task.finished_at = None;
        if let Err(e) = self.store.upsert_task(&task).await {
            tracing::error!(task_id = %task.id, error = %e, "Failed to mark task started");
        }

        let started = Instant::now();
        let dispatched = match self.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, self.dispatch(&job, task.id))
                .await
                .ok(),
            None => Some(self.dispatch(&job, task.id).await),
        };
        metrics::histogram!("worker_handler_seconds", "queue" => queue.to_string())
            .record(started.elapsed().as_secs_f64());

        let (status, outcome, data) = match dispatched {
            Some(Ok(HandlerOutcome {
                success: true,
                data,
            })) => (Status::finished(true), Outcome::Succeeded, Some(data)),
            Some(Ok(HandlerOutcome { success: false, .. })) => {
                (Status::finished(false), Outcome::Failed, None)
            }
            Some(Err(e)) if e.is_dispatch_error() => {
                tracing::error!(job_id = %job.id, task_id = %task.id, error = %e, "Job cannot be dispatched");
                (Status::finished(false), Outcome::Rejected, None)
            }
            Some(Err(e)) => {
                tracing::warn!(job_id = %job.id, task_id = %task.id, error = %e, "Handler failed");
                self.dead_letter(queue, &job, body).await?;
                (Status::finished(false), Outcome::DeadLettered, None)
            }
            None => {
                tracing::warn!(job_id = %job.id, task_id = %task.id, "Handler exceeded deadline");
                self.dead_letter(queue, &job, body).await?;
                (Status::timed_out(), Outcome::TimedOut, None)
            }
        };

        task.status = status;
        task.finished_at = Some(Utc::now());
        match data {
            Some(data) => {
                result.checksum = Some(data_checksum(&data));
                result.data = data;
                result.result_state = ResultState::Present;
            }
            None => {
                result.checksum = None;
                result.data = serde_json::Value::Null;
                result.result_state = ResultState::NotSet;
            }
        }

        if let Err(e) = self.store.record_outcome(&task, &result).await {
            tracing::error!(
                job_id = %job.id,
                task_id = %task.id,
                outcome = %outcome,
                error = %e,
                "Lost update: task outcome could not be persisted"
            );
        }

        record(queue, outcome);
        tracing::info!(job_id = %job.id, task_id = %task.id, outcome = %outcome, "Task finished");
        Ok(outcome)
    }

    async fn dispatch(&self, job: &Job, task_id: Uuid) -> Result<HandlerOutcome, HandlerError> {
        match (job.job_type, &job.payload) {
            (JobType::CreateBooking, JobPayload::BookingRequest(request)) => {
                handlers::booking::handle(&job.user_id, task_id, request, self.orders.as_ref()).await
            }
            (JobType::CreateSearch, JobPayload::SearchRequest(request)) => {
                handlers::search::handle(request).await
            }
            (JobType::Manual, JobPayload::None) => handlers::manual::handle(job).await,
            (JobType::Empty, _) => Err(HandlerError::Unroutable(JobType::Empty)),
            (job_type @ (JobType::CreateBooking | JobType::CreateSearch | JobType::Manual), _) => {
                Err(HandlerError::PayloadMismatch(job_type))
            }
        }
    }

    /// Publish the original, unmodified message body to LOST_ITEM.
    async fn dead_letter(&self, queue: QueueName, job: &Job, body: &[u8]) -> Result<(), WorkerError> {
        self.broker
            .publish(&self.exchange, &QueueName::LostItem.routing_key(), body)
            .await?;
        metrics::counter!("worker_dead_lettered_total", "queue" => queue.to_string()).increment(1);
        tracing::warn!(queue = %queue, job_id = %job.id, "Message copied to LOST_ITEM");
        Ok(())
    }
}

fn record(queue: QueueName, outcome: Outcome) {
    let outcome: &'static str = outcome.into();
    metrics::counter!("worker_messages_total", "queue" => queue.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Hex SHA-256 of the JSON encoding of result data.
pub fn data_checksum(data: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(data).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl WorkerError {
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Broker(e) => e.is_transient(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_hex_sha256() {
        let data = serde_json::json!({ "bookingId": "abc" });
        let checksum = data_checksum(&data);

        assert_eq!(checksum.len(), 64);
        assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(checksum, data_checksum(&data.clone()));
        assert_ne!(checksum, data_checksum(&serde_json::json!({ "bookingId": "abd" })));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::DeadLettered.to_string(), "dead_lettered");
        let label: &'static str = Outcome::TimedOut.into();
        assert_eq!(label, "timed_out");
    }
}
