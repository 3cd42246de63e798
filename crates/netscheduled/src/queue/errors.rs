use thiserror::Error;

use super::JobStatus;

/// Failures reported by a [`super::QueueService`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue does not exist.
    #[error("queue '{0}' does not exist")]
    UnknownQueue(String),
    /// The job does not exist in the queue.
    #[error("job {id} not found")]
    JobNotFound {
        /// Requested job id.
        id: u64,
    },
    /// The job is in a state that forbids the operation.
    #[error("job {id} is {status}; cannot {operation}")]
    InvalidStatus {
        /// Job id.
        id: u64,
        /// Current job status.
        status: JobStatus,
        /// Attempted operation.
        operation: &'static str,
    },
    /// A read token did not match the outstanding read.
    #[error("auth token does not match the outstanding read of job {id}")]
    InvalidAuthToken {
        /// Job id.
        id: u64,
    },
    /// A queue with the requested name already exists.
    #[error("queue '{0}' already exists")]
    QueueExists(String),
    /// Dynamic queues can only be created from configured classes.
    #[error("queue class '{0}' is not configured")]
    UnknownClass(String),
    /// Statically configured queues cannot be deleted.
    #[error("queue '{0}' is configured statically and cannot be deleted")]
    StaticQueue(String),
    /// The store is damaged and cannot continue.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl QueueError {
    /// Creates an invalid status error.
    #[must_use]
    pub fn invalid_status(id: u64, status: JobStatus, operation: &'static str) -> Self {
        Self::InvalidStatus {
            id,
            status,
            operation,
        }
    }

    /// Creates a storage failure.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Returns `true` when the failure should stop the whole server.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
