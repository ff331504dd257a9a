use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{check_job_rows, JobStore, OrderStore, StoreError};
use crate::models::booking::Order;
use crate::models::job::{Job, Task, TaskResult};

/// In-process store with the same row contracts as [`super::PgStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    tasks: HashMap<Uuid, Task>,
    // keyed by task id (1:1)
    results: HashMap<Uuid, TaskResult>,
    orders: HashMap<Uuid, Order>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn task(&self, task_id: Uuid) -> Option<Task> {
        self.lock().tasks.get(&task_id).cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(
        &self,
        job: &Job,
        tasks: &[Task],
        results: &[TaskResult],
    ) -> Result<(), StoreError> {
        check_job_rows(job, tasks, results)?;

        let mut state = self.lock();
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::Invariant(format!("job {} already exists", job.id)));
        }
        state.jobs.insert(job.id, job.clone());
        for task in tasks {
            state.tasks.insert(task.id, task.clone());
        }
        for result in results {
            state.results.insert(result.task_id, result.clone());
        }
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().jobs.get(&job_id).cloned())
    }

    async fn tasks_for_job(&self, job_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .lock()
            .tasks
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn result_for_task(&self, task_id: Uuid) -> Result<Option<TaskResult>, StoreError> {
        Ok(self.lock().results.get(&task_id).cloned())
    }

    async fn upsert_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.jobs.contains_key(&task.job_id) {
            return Err(StoreError::MissingParent(format!("job {}", task.job_id)));
        }
        state.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn record_outcome(&self, task: &Task, result: &TaskResult) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.jobs.contains_key(&task.job_id) {
            return Err(StoreError::MissingParent(format!("job {}", task.job_id)));
        }
        if result.task_id != task.id {
            return Err(StoreError::Invariant(format!(
                "result {} does not belong to task {}",
                result.id, task.id
            )));
        }
        state.tasks.insert(task.id, task.clone());
        state.results.insert(result.task_id, result.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.lock()
            .orders
            .entry(order.id)
            .or_insert_with(|| order.clone());
        Ok(())
    }
}
