use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::booking::Order;
use crate::models::job::{Job, Task, TaskResult};

pub mod memory;
pub mod queries;

pub use memory::MemoryStore;
pub use queries::PgStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Job, Task and Result rows.
///
/// Task and Result writes are upserts keyed by id so a redelivered message
/// converges on the same rows (last write wins).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a job with all of its tasks and results in one transaction.
    async fn insert_job(
        &self,
        job: &Job,
        tasks: &[Task],
        results: &[TaskResult],
    ) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn tasks_for_job(&self, job_id: Uuid) -> Result<Vec<Task>, StoreError>;

    async fn result_for_task(&self, task_id: Uuid) -> Result<Option<TaskResult>, StoreError>;

    async fn upsert_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Write a finished task and its result together.
    async fn record_outcome(&self, task: &Task, result: &TaskResult) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Storage used by the booking handler. Inserts commit on their own.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order; inserting the same order id again is a no-op.
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;
}

/// Checks shared by every [`JobStore::insert_job`] implementation.
pub(crate) fn check_job_rows(
    job: &Job,
    tasks: &[Task],
    results: &[TaskResult],
) -> Result<(), StoreError> {
    if job.number_of_tasks as usize != tasks.len() {
        return Err(StoreError::Invariant(format!(
            "job {} declares {} tasks but {} were supplied",
            job.id,
            job.number_of_tasks,
            tasks.len()
        )));
    }
    if tasks.iter().any(|t| t.job_id != job.id) {
        return Err(StoreError::Invariant(format!(
            "task does not belong to job {}",
            job.id
        )));
    }
    let orphan = results
        .iter()
        .any(|r| !tasks.iter().any(|t| t.id == r.task_id));
    if results.len() != tasks.len() || orphan {
        return Err(StoreError::Invariant(format!(
            "job {} needs exactly one result per task",
            job.id
        )));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Missing parent row: {0}")]
    MissingParent(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}
