//! Undo values for queue mutations whose reply could not be delivered.

use tracing::{trace, warn};

use super::PROTOCOL_TARGET;
use super::response::Response;
use crate::queue::{QueueError, QueueService, ReadOutcome};

/// How to undo a queue mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    /// Erase freshly submitted jobs.
    Submit {
        /// Queue holding the jobs.
        queue: String,
        /// Ids of the submitted jobs.
        ids: Vec<u64>,
    },
    /// Return a leased job to `Pending` without counting an attempt.
    GetJob {
        /// Queue holding the job.
        queue: String,
        /// Leased job id.
        id: u64,
    },
    /// Return a read job to its pre-read state.
    Read {
        /// Queue holding the job.
        queue: String,
        /// Read job id.
        id: u64,
        /// Token handed out with the read.
        token: String,
    },
}

impl Rollback {
    /// Undoes the mutation.
    ///
    /// # Errors
    ///
    /// Returns the queue service failure, if any.
    pub fn execute(&self, queues: &dyn QueueService) -> Result<(), QueueError> {
        warn!(target: PROTOCOL_TARGET, rollback = ?self, "reply not delivered; rolling back");
        match self {
            Self::Submit { queue, ids } => queues.erase(queue, ids),
            Self::GetJob { queue, id } => queues.return_job(queue, *id, false),
            Self::Read { queue, id, token } => {
                queues.finish_read(queue, *id, token, &ReadOutcome::Rollback)
            }
        }
    }

    /// Discards the undo once the reply was delivered.
    pub fn commit(self) {
        trace!(target: PROTOCOL_TARGET, rollback = ?self, "reply delivered; rollback dropped");
    }
}

/// Result of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Write the response and continue.
    Reply(Response),
    /// Write the response; undo the mutation if the write fails.
    Guarded {
        /// Response to deliver.
        reply: Response,
        /// Undo applied when delivery fails.
        rollback: Rollback,
    },
    /// Continue without writing anything.
    Silent,
    /// Close the connection without replying.
    Close,
}

impl Outcome {
    /// Single `OK:` line.
    #[must_use]
    pub fn ok(payload: impl Into<String>) -> Self {
        Self::Reply(Response::ok(payload))
    }

    /// Guarded single `OK:` line.
    #[must_use]
    pub fn guarded(payload: impl Into<String>, rollback: Rollback) -> Self {
        Self::Guarded {
            reply: Response::ok(payload),
            rollback,
        }
    }
}

impl From<Response> for Outcome {
    fn from(response: Response) -> Self {
        Self::Reply(response)
    }
}
