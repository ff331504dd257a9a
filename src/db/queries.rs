use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{check_job_rows, JobStore, OrderStore, StoreError};
use crate::models::booking::Order;
use crate::models::job::{
    Job, JobPayload, JobType, ProcessingState, ResultState, ResultType, Status, Task, TaskResult,
};

/// PostgreSQL implementation of the job and order stores.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse<T: FromStr>(column: &str, value: &str) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("unexpected {column} value '{value}'")))
}

fn status_from_row(row: &PgRow) -> Result<Status, StoreError> {
    let state: String = row.try_get("state")?;
    Ok(Status {
        state: parse::<ProcessingState>("state", &state)?,
        success: row.try_get("success")?,
        is_finished: row.try_get("is_finished")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let job_type: String = row.try_get("job_type")?;
    let payload: serde_json::Value = row.try_get("payload")?;

    Ok(Job {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        job_type: parse::<JobType>("job_type", &job_type)?,
        created_at: row.try_get("created_at")?,
        job_status: status_from_row(row)?,
        number_of_tasks: row.try_get("number_of_tasks")?,
        payload: serde_json::from_value::<JobPayload>(payload)?,
    })
}

fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    Ok(Task {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        status: status_from_row(row)?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn result_from_row(row: &PgRow) -> Result<TaskResult, StoreError> {
    let result_type: String = row.try_get("result_type")?;
    let result_state: String = row.try_get("result_state")?;

    Ok(TaskResult {
        id: row.try_get("id")?,
        result_type: parse::<ResultType>("result_type", &result_type)?,
        result_state: parse::<ResultState>("result_state", &result_state)?,
        task_id: row.try_get("task_id")?,
        data: row.try_get("data")?,
        checksum: row.try_get("checksum")?,
    })
}

async fn upsert_task_in(tx: &mut Transaction<'_, Postgres>, task: &Task) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO tasks (id, job_id, state, success, is_finished, created_at, started_at, finished_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE
        SET state = EXCLUDED.state,
            success = EXCLUDED.success,
            is_finished = EXCLUDED.is_finished,
            started_at = EXCLUDED.started_at,
            finished_at = EXCLUDED.finished_at
        "#,
    )
    .bind(task.id)
    .bind(task.job_id)
    .bind(task.status.state.to_string())
    .bind(task.status.success)
    .bind(task.status.is_finished)
    .bind(task.created_at)
    .bind(task.started_at)
    .bind(task.finished_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_result_in(
    tx: &mut Transaction<'_, Postgres>,
    result: &TaskResult,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO results (id, task_id, result_type, result_state, data, checksum)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE
        SET result_type = EXCLUDED.result_type,
            result_state = EXCLUDED.result_state,
            data = EXCLUDED.data,
            checksum = EXCLUDED.checksum
        "#,
    )
    .bind(result.id)
    .bind(result.task_id)
    .bind(result.result_type.to_string())
    .bind(result.result_state.to_string())
    .bind(&result.data)
    .bind(result.checksum.as_deref())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(
        &self,
        job: &Job,
        tasks: &[Task],
        results: &[TaskResult],
    ) -> Result<(), StoreError> {
        check_job_rows(job, tasks, results)?;
        let payload = serde_json::to_value(&job.payload)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, user_id, job_type, created_at, state, success, is_finished,
                              number_of_tasks, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id)
        .bind(&job.user_id)
        .bind(job.job_type.to_string())
        .bind(job.created_at)
        .bind(job.job_status.state.to_string())
        .bind(job.job_status.success)
        .bind(job.job_status.is_finished)
        .bind(job.number_of_tasks)
        .bind(payload)
        .execute(&mut *tx)
        .await?;

        for task in tasks {
            upsert_task_in(&mut tx, task).await?;
        }
        for result in results {
            upsert_result_in(&mut tx, result).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, job_type, created_at, state, success, is_finished,
                   number_of_tasks, payload
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn tasks_for_job(&self, job_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, state, success, is_finished, created_at, started_at, finished_at
            FROM tasks
            WHERE job_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn result_for_task(&self, task_id: Uuid) -> Result<Option<TaskResult>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, task_id, result_type, result_state, data, checksum
            FROM results
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(result_from_row).transpose()
    }

    async fn upsert_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_task_in(&mut tx, task).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_outcome(&self, task: &Task, result: &TaskResult) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_task_in(&mut tx, task).await?;
        upsert_result_in(&mut tx, result).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let items = serde_json::to_value(&order.items)?;
        let shipping = order
            .shipping
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO orders (id, task_id, user_id, items, shipping, total, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(order.id)
        .bind(order.task_id)
        .bind(&order.user_id)
        .bind(items)
        .bind(shipping)
        .bind(order.total)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
