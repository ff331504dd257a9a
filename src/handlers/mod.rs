//! Stateless job handlers. Each maps a typed payload (plus the storage it
//! needs) to an outcome; side effects go only through that storage.

pub mod booking;
pub mod manual;
pub mod search;

use crate::db::StoreError;
use crate::models::job::JobType;

/// What a handler reports back to the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    pub success: bool,
    pub data: serde_json::Value,
}

impl HandlerOutcome {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
        }
    }
}

/// A handler could not run to completion.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("No handler for job type {0}")]
    Unroutable(JobType),

    #[error("Payload does not match job type {0}")]
    PayloadMismatch(JobType),
}

impl HandlerError {
    /// Dispatch failures are terminal for the message: nothing ran, so there
    /// is nothing worth replaying from the dead-letter queue.
    pub fn is_dispatch_error(&self) -> bool {
        matches!(
            self,
            HandlerError::Unroutable(_) | HandlerError::PayloadMismatch(_)
        )
    }
}
