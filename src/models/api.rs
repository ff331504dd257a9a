use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::job::{JobType, Status};

/// Response after a job has been accepted for asynchronous processing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub job_status: Status,
    pub message: String,
}

/// Response for polling a job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub job_status: Status,
    pub stop_time: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}
