use std::slice;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::job::{Job, JobPayload, JobType, Status, Task, TaskResult};
use crate::models::queue_item::QueueItem;
use crate::services::broker::{BrokerError, MessageBroker};

/// Creates jobs: rows first, then the queue message.
pub struct JobSubmitter {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn MessageBroker>,
    exchange: String,
}

impl JobSubmitter {
    pub fn new(
        store: Arc<dyn JobStore>,
        broker: Arc<dyn MessageBroker>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            store,
            broker,
            exchange: exchange.into(),
        }
    }

    /// Persist a job with one task and one result, then publish its
    /// [`QueueItem`] on the job type's queue.
    ///
    /// Nothing is published when persistence fails. A publish failure after
    /// the commit leaves the job stuck in `NotSet` with no message in flight;
    /// it is reported as [`SubmitError::Publish`] and not retried here.
    pub async fn submit(
        &self,
        job_type: JobType,
        user_id: &str,
        payload: JobPayload,
    ) -> Result<Uuid, SubmitError> {
        let queue = job_type.queue().ok_or_else(|| {
            SubmitError::InvalidRequest(format!("job type {job_type} cannot be queued"))
        })?;
        if !payload.fits(job_type) {
            return Err(SubmitError::InvalidRequest(format!(
                "payload does not match job type {job_type}"
            )));
        }
        if user_id.trim().is_empty() {
            return Err(SubmitError::InvalidRequest("missing user id".to_string()));
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            job_type,
            created_at: now,
            job_status: Status::not_set(),
            number_of_tasks: 1,
            payload,
        };
        let task = Task::new(job.id, now);
        let result = TaskResult::new(task.id);
        let item = QueueItem { job, task, result };
        let job_id = item.job.id;

        let body = item.to_bytes()?;

        self.store
            .insert_job(
                &item.job,
                slice::from_ref(&item.task),
                slice::from_ref(&item.result),
            )
            .await?;

        if let Err(source) = self
            .broker
            .publish(&self.exchange, &queue.routing_key(), &body)
            .await
        {
            tracing::error!(
                job_id = %job_id,
                queue = %queue,
                error = %source,
                "Job persisted but publish failed; job has no message in flight"
            );
            metrics::counter!("jobs_publish_failed_total").increment(1);
            return Err(SubmitError::Publish { job_id, source });
        }

        metrics::counter!("jobs_submitted_total", "job_type" => job_type.to_string()).increment(1);
        tracing::info!(
            job_id = %job_id,
            task_id = %item.task.id,
            job_type = %job_type,
            queue = %queue,
            "Job submitted"
        );

        Ok(job_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error("Failed to encode queue item: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to persist job: {0}")]
    Persistence(#[from] StoreError),

    #[error("Job {job_id} was persisted but could not be published: {source}")]
    Publish {
        job_id: Uuid,
        #[source]
        source: BrokerError,
    },
}
