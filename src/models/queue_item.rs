use serde::{Deserialize, Serialize};

use super::job::{Job, Task, TaskResult};

/// Body of every queue message: the rows a worker needs to process one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub job: Job,
    pub task: Task,
    pub result: TaskResult,
}

impl QueueItem {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_documented_wire_shape() {
        let body = br#"{
            "job": {
                "jobId": "7f1c2a52-5d0e-4c1b-9c55-0a4f1c9a7e01",
                "userId": "U1",
                "jobType": "CreateBooking",
                "createdAt": "2024-05-01T10:00:00Z",
                "jobStatus": {"state": "NotSet", "success": false, "isFinished": false},
                "numberOfTasks": 1,
                "bookingRequest": {"cart": [{"pid": "P1", "quantity": 2, "calculatedPrice": 19.98}]}
            },
            "task": {
                "taskId": "1b7e4d8a-3f2c-4e6a-8b1d-2c3e4f5a6b7c",
                "jobId": "7f1c2a52-5d0e-4c1b-9c55-0a4f1c9a7e01",
                "status": {"state": "NotSet", "success": false, "isFinished": false},
                "createdAt": "2024-05-01T10:00:00Z",
                "started": null,
                "finished": null
            },
            "result": {
                "resultId": "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d",
                "resultType": "Database",
                "resultState": "NotSet",
                "taskId": "1b7e4d8a-3f2c-4e6a-8b1d-2c3e4f5a6b7c",
                "data": null,
                "dataChecksum": null
            }
        }"#;

        let item = QueueItem::from_bytes(body).unwrap();
        assert_eq!(item.job.user_id, "U1");
        assert_eq!(item.task.job_id, item.job.id);
        assert_eq!(item.result.task_id, item.task.id);
        assert!(item.result.checksum.is_none());
    }

    #[test]
    fn test_rejects_malformed_body() {
        assert!(QueueItem::from_bytes(b"{not json").is_err());
        assert!(QueueItem::from_bytes(br#"{"job": {}}"#).is_err());
    }
}
