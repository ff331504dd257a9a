use super::{HandlerError, HandlerOutcome};
use crate::models::job::Job;

/// Manual jobs are worked by an operator outside this system; the worker
/// only records that the job reached the manual queue.
pub async fn handle(job: &Job) -> Result<HandlerOutcome, HandlerError> {
    tracing::info!(job_id = %job.id, user_id = %job.user_id, "Manual job handed to operators");
    Ok(HandlerOutcome::success(serde_json::json!({ "handledBy": "manual" })))
}
