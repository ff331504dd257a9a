use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::booking::BookingRequest;
use super::search::SearchRequest;
use crate::services::broker::QueueName;

/// Kind of asynchronous work a job represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
pub enum JobType {
    Empty,
    CreateSearch,
    CreateBooking,
    Manual,
}

impl JobType {
    /// Queue (and routing key) this job type is delivered on. `Empty` has none.
    pub fn queue(self) -> Option<QueueName> {
        match self {
            JobType::Empty => None,
            JobType::CreateSearch => Some(QueueName::Search),
            JobType::CreateBooking => Some(QueueName::Booking),
            JobType::Manual => Some(QueueName::Manual),
        }
    }
}

/// Processing state shared by tasks and the derived job status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
pub enum ProcessingState {
    NotSet,
    Received,
    Pending,
    Finished,
    Timeout,
    NoTasks,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub state: ProcessingState,
    pub success: bool,
    pub is_finished: bool,
}

impl Status {
    pub const fn not_set() -> Self {
        Self {
            state: ProcessingState::NotSet,
            success: false,
            is_finished: false,
        }
    }

    pub const fn pending() -> Self {
        Self {
            state: ProcessingState::Pending,
            success: false,
            is_finished: false,
        }
    }

    pub const fn finished(success: bool) -> Self {
        Self {
            state: ProcessingState::Finished,
            success,
            is_finished: true,
        }
    }

    pub const fn timed_out() -> Self {
        Self {
            state: ProcessingState::Timeout,
            success: false,
            is_finished: true,
        }
    }
}

/// Typed job input. Serialized only at the persistence and wire edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobPayload {
    BookingRequest(BookingRequest),
    SearchRequest(SearchRequest),
    None,
}

impl JobPayload {
    /// Whether this payload is acceptable for the given job type.
    pub fn fits(&self, job_type: JobType) -> bool {
        matches!(
            (job_type, self),
            (JobType::CreateBooking, JobPayload::BookingRequest(_))
                | (JobType::CreateSearch, JobPayload::SearchRequest(_))
                | (JobType::Manual, JobPayload::None)
        )
    }
}

/// A user-requested unit of asynchronous work.
///
/// On the wire the payload is flattened into an optional `bookingRequest` or
/// `searchRequest` key next to the job fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JobWire", into = "JobWire")]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub job_type: JobType,
    pub created_at: DateTime<Utc>,
    pub job_status: Status,
    pub number_of_tasks: i32,
    pub payload: JobPayload,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobWire {
    job_id: Uuid,
    user_id: String,
    job_type: JobType,
    created_at: DateTime<Utc>,
    job_status: Status,
    number_of_tasks: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    booking_request: Option<BookingRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    search_request: Option<SearchRequest>,
}

impl TryFrom<JobWire> for Job {
    type Error = String;

    fn try_from(wire: JobWire) -> Result<Self, Self::Error> {
        let payload = match (wire.booking_request, wire.search_request) {
            (Some(booking), None) => JobPayload::BookingRequest(booking),
            (None, Some(search)) => JobPayload::SearchRequest(search),
            (None, None) => JobPayload::None,
            (Some(_), Some(_)) => {
                return Err("job carries both bookingRequest and searchRequest".to_string())
            }
        };

        Ok(Job {
            id: wire.job_id,
            user_id: wire.user_id,
            job_type: wire.job_type,
            created_at: wire.created_at,
            job_status: wire.job_status,
            number_of_tasks: wire.number_of_tasks,
            payload,
        })
    }
}

impl From<Job> for JobWire {
    fn from(job: Job) -> Self {
        let (booking_request, search_request) = match job.payload {
            JobPayload::BookingRequest(booking) => (Some(booking), None),
            JobPayload::SearchRequest(search) => (None, Some(search)),
            JobPayload::None => (None, None),
        };

        JobWire {
            job_id: job.id,
            user_id: job.user_id,
            job_type: job.job_type,
            created_at: job.created_at,
            job_status: job.job_status,
            number_of_tasks: job.number_of_tasks,
            booking_request,
            search_request,
        }
    }
}

/// An individually tracked execution unit within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "taskId")]
    pub id: Uuid,
    pub job_id: Uuid,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "started")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finished")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(job_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            status: Status::not_set(),
            created_at,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
pub enum ResultType {
    Database,
    File,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
pub enum ResultState {
    NotSet,
    Pending,
    Present,
    Archived,
    Removed,
}

/// The persisted outcome artifact of a task (1:1 with [`Task`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(rename = "resultId")]
    pub id: Uuid,
    pub result_type: ResultType,
    pub result_state: ResultState,
    pub task_id: Uuid,
    pub data: serde_json::Value,
    #[serde(rename = "dataChecksum")]
    pub checksum: Option<String>,
}

impl TaskResult {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            result_type: ResultType::Database,
            result_state: ResultState::NotSet,
            task_id,
            data: serde_json::Value::Null,
            checksum: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::booking::CartItem;

    fn booking_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            user_id: "U1".to_string(),
            job_type: JobType::CreateBooking,
            created_at: Utc::now(),
            job_status: Status::not_set(),
            number_of_tasks: 1,
            payload: JobPayload::BookingRequest(BookingRequest {
                cart: vec![CartItem {
                    pid: "P1".to_string(),
                    quantity: 2,
                    calculated_price: 19.98,
                }],
                shipping: None,
            }),
        }
    }

    #[test]
    fn test_job_wire_uses_flattened_request_key() {
        let job = booking_job();
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["jobId"], serde_json::json!(job.id));
        assert_eq!(value["jobType"], "CreateBooking");
        assert_eq!(value["numberOfTasks"], 1);
        assert_eq!(value["jobStatus"]["state"], "NotSet");
        assert_eq!(value["jobStatus"]["isFinished"], false);
        assert_eq!(value["bookingRequest"]["cart"][0]["calculatedPrice"], 19.98);
        assert!(value.get("searchRequest").is_none());
    }

    #[test]
    fn test_job_without_request_decodes_to_none_payload() {
        let mut job = booking_job();
        job.job_type = JobType::Manual;
        job.payload = JobPayload::None;

        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.payload, JobPayload::None);
    }

    #[test]
    fn test_job_with_both_requests_is_rejected() {
        let mut value = serde_json::to_value(booking_job()).unwrap();
        value["searchRequest"] = serde_json::json!({ "query": "hotels" });

        assert!(serde_json::from_value::<Job>(value).is_err());
    }

    #[test]
    fn test_task_wire_field_names() {
        let task = Task::new(Uuid::new_v4(), Utc::now());
        let value = serde_json::to_value(&task).unwrap();

        assert!(value.get("taskId").is_some());
        assert!(value.get("jobId").is_some());
        assert!(value["started"].is_null());
        assert!(value["finished"].is_null());
    }

    #[test]
    fn test_payload_fits_job_type() {
        let job = booking_job();
        assert!(job.payload.fits(JobType::CreateBooking));
        assert!(!job.payload.fits(JobType::CreateSearch));
        assert!(JobPayload::None.fits(JobType::Manual));
        assert!(!JobPayload::None.fits(JobType::Empty));
    }

    #[test]
    fn test_job_type_queue_mapping() {
        assert_eq!(JobType::CreateBooking.queue(), Some(QueueName::Booking));
        assert_eq!(JobType::CreateSearch.queue(), Some(QueueName::Search));
        assert_eq!(JobType::Manual.queue(), Some(QueueName::Manual));
        assert_eq!(JobType::Empty.queue(), None);
    }
}
