use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::job::{Job, ProcessingState, Status, Task};

/// Job status derived from its tasks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobStatusReport {
    pub status: Status,
    /// Latest task finish time, set only when every task finished.
    pub stop_time: Option<DateTime<Utc>>,
}

/// Fold task states into one job status. First matching rule wins:
/// no tasks, any timeout, any not-set, any received/pending, all finished.
pub fn aggregate(tasks: &[Task]) -> JobStatusReport {
    let report = |status| JobStatusReport {
        status,
        stop_time: None,
    };

    if tasks.is_empty() {
        return report(Status {
            state: ProcessingState::NoTasks,
            success: false,
            is_finished: true,
        });
    }

    let any = |wanted: &[ProcessingState]| tasks.iter().any(|t| wanted.contains(&t.status.state));

    if any(&[ProcessingState::Timeout]) {
        return report(Status::timed_out());
    }
    // NoTasks never belongs on a task row; treat it as unset.
    if any(&[ProcessingState::NotSet, ProcessingState::NoTasks]) {
        return report(Status::not_set());
    }
    if any(&[ProcessingState::Received, ProcessingState::Pending]) {
        return report(Status::pending());
    }

    JobStatusReport {
        status: Status::finished(tasks.iter().all(|t| t.status.success)),
        stop_time: tasks.iter().filter_map(|t| t.finished_at).max(),
    }
}

/// Results are shown only for jobs that finished successfully.
pub fn exposes_result(status: &Status) -> bool {
    status.is_finished && status.state == ProcessingState::Finished && status.success
}

/// Everything a caller polling a job gets back.
#[derive(Debug, Clone)]
pub struct JobView {
    pub job: Job,
    pub report: JobStatusReport,
    pub result: Option<serde_json::Value>,
}

/// Derives job status on demand; nothing is written back to the job row.
pub struct JobStatusAggregator {
    store: Arc<dyn JobStore>,
}

impl JobStatusAggregator {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn status(&self, job_id: Uuid) -> Result<JobStatusReport, StoreError> {
        let tasks = self.store.tasks_for_job(job_id).await?;
        Ok(aggregate(&tasks))
    }

    /// Job, derived status and (fail-closed) result data. `None` for an
    /// unknown job id.
    pub async fn job_view(&self, job_id: Uuid) -> Result<Option<JobView>, StoreError> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(None);
        };
        let tasks = self.store.tasks_for_job(job_id).await?;
        let report = aggregate(&tasks);

        let result = if exposes_result(&report.status) {
            let mut data = Vec::with_capacity(tasks.len());
            for task in &tasks {
                if let Some(result) = self.store.result_for_task(task.id).await? {
                    data.push(result.data);
                }
            }
            match data.len() {
                0 => None,
                1 => data.pop(),
                _ => Some(serde_json::Value::Array(data)),
            }
        } else {
            None
        };

        Ok(Some(JobView {
            job,
            report,
            result,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(status: Status) -> Task {
        let mut task = Task::new(Uuid::new_v4(), Utc::now());
        task.status = status;
        if status.is_finished {
            task.finished_at = Some(Utc::now());
        }
        task
    }

    #[test]
    fn test_no_tasks() {
        let report = aggregate(&[]);
        assert_eq!(report.status.state, ProcessingState::NoTasks);
        assert!(!report.status.success);
        assert!(report.status.is_finished);
    }

    #[test]
    fn test_single_success() {
        let report = aggregate(&[task(Status::finished(true))]);
        assert_eq!(report.status, Status::finished(true));
        assert!(report.stop_time.is_some());
    }

    #[test]
    fn test_single_failure() {
        let report = aggregate(&[task(Status::finished(false))]);
        assert_eq!(report.status, Status::finished(false));
    }

    #[test]
    fn test_finished_and_pending_is_pending() {
        let report = aggregate(&[task(Status::finished(true)), task(Status::pending())]);
        assert_eq!(report.status.state, ProcessingState::Pending);
        assert!(!report.status.success);
        assert!(!report.status.is_finished);
        assert!(report.stop_time.is_none());
    }

    #[test]
    fn test_received_counts_as_pending() {
        let received = Status {
            state: ProcessingState::Received,
            success: false,
            is_finished: false,
        };
        let report = aggregate(&[task(received)]);
        assert_eq!(report.status.state, ProcessingState::Pending);
    }

    #[test]
    fn test_timeout_beats_not_set() {
        let report = aggregate(&[task(Status::not_set()), task(Status::timed_out())]);
        assert_eq!(report.status, Status::timed_out());
    }

    #[test]
    fn test_not_set_beats_pending() {
        let report = aggregate(&[task(Status::pending()), task(Status::not_set())]);
        assert_eq!(report.status, Status::not_set());
    }

    #[test]
    fn test_success_is_and_over_tasks_and_stop_time_is_latest() {
        let mut early = task(Status::finished(true));
        let mut late = task(Status::finished(false));
        let now = Utc::now();
        early.finished_at = Some(now - Duration::seconds(30));
        late.finished_at = Some(now);

        let report = aggregate(&[early, late]);
        assert_eq!(report.status, Status::finished(false));
        assert_eq!(report.stop_time, Some(now));
    }

    #[test]
    fn test_result_exposure_is_fail_closed() {
        assert!(exposes_result(&Status::finished(true)));
        assert!(!exposes_result(&Status::finished(false)));
        assert!(!exposes_result(&Status::pending()));
        assert!(!exposes_result(&Status::timed_out()));
        assert!(!exposes_result(&Status {
            state: ProcessingState::Finished,
            success: true,
            is_finished: false,
        }));
    }
}
