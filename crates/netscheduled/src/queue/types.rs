use std::collections::BTreeMap;

use strum::{Display, EnumString};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum JobStatus {
    /// Waiting for a worker.
    Pending,
    /// Leased to a worker.
    Running,
    /// Finished successfully; not yet read.
    Done,
    /// Finished with a failure; not yet read.
    Failed,
    /// Cancelled before completion.
    Canceled,
    /// Handed to a reader awaiting confirmation.
    Reading,
    /// Result read and confirmed.
    Confirmed,
    /// Reader reported it could not process the result.
    ReadFailed,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Pending,
        Self::Running,
        Self::Done,
        Self::Failed,
        Self::Canceled,
        Self::Reading,
        Self::Confirmed,
        Self::ReadFailed,
    ];

    /// Returns `true` once no worker will touch the job again.
    #[must_use]
    pub const fn is_final(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Returns `true` when a reader may pick up the job.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }
}

/// A job as submitted by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSubmission {
    /// Opaque job input.
    pub input: String,
    /// Affinity token; empty when none.
    pub affinity: String,
    /// Client-defined bit mask.
    pub mask: u32,
    /// Address of the submitting client.
    pub client_ip: String,
    /// Session identifier of the submitting client.
    pub client_sid: String,
    /// Port on which the submitter listens for notifications; `0` for none.
    pub notify_port: u16,
    /// Seconds the submitter wants to be notified for.
    pub notify_timeout: u32,
}

/// Point-in-time copy of a stored job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    /// Job id.
    pub id: u64,
    /// Queue holding the job.
    pub queue: String,
    /// Current status.
    pub status: JobStatus,
    /// Submission details.
    pub submission: JobSubmission,
    /// Output reported by the worker.
    pub output: String,
    /// Error message reported by the worker or reader.
    pub error_message: String,
    /// Return code reported by the worker.
    pub return_code: i32,
    /// Latest progress message.
    pub progress: String,
    /// Number of times the job was leased.
    pub attempts: u32,
}

/// Result reported by a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobResult {
    /// Process return code.
    pub return_code: i32,
    /// Output payload.
    pub output: String,
}

/// Selection criteria for leasing a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequest {
    /// Worker node identifier.
    pub worker: String,
    /// Affinities explicitly requested for this pull.
    pub affinities: Vec<String>,
    /// Fall back to jobs of any affinity when no preferred one is pending.
    pub any_affinity: bool,
    /// Prefer affinities no other worker has claimed.
    pub exclusive_new: bool,
}

/// A job leased to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedJob {
    /// Job as leased.
    pub job: JobSnapshot,
    /// Token identifying this lease.
    pub auth_token: String,
}

/// A finished job handed to a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadLease {
    /// Job id.
    pub id: u64,
    /// Status the job finished with.
    pub status: JobStatus,
    /// Token the reader must present to confirm or roll back.
    pub auth_token: String,
}

/// How a reader finishes a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The result was processed.
    Confirm,
    /// The result could not be processed.
    Fail(String),
    /// Undo the read; the job becomes readable again.
    Rollback,
}

/// Change to a worker's preferred affinities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffinityUpdate {
    /// Add and remove individual tokens.
    Modify {
        /// Tokens to add.
        add: Vec<String>,
        /// Tokens to remove.
        remove: Vec<String>,
    },
    /// Replace the whole set.
    Replace(Vec<String>),
}

/// Whether a queue comes from configuration or from `QCRE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum QueueKind {
    /// Configured at start-up.
    Static,
    /// Created at runtime from a class.
    Dynamic,
}

/// Description of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// Queue name.
    pub name: String,
    /// Static or dynamic.
    pub kind: QueueKind,
    /// Class the queue was created from; empty for static queues.
    pub class: String,
    /// Free-form description.
    pub description: String,
    /// Job counts per status.
    pub counts: BTreeMap<JobStatus, usize>,
}

/// A client seen on a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRecord {
    /// Client node identifier, or the peer address when none was given.
    pub node: String,
    /// Client session identifier.
    pub session: String,
    /// Peer address.
    pub address: String,
    /// Reported client program.
    pub program: String,
    /// Seconds since the Unix epoch of the last activity.
    pub last_seen: u64,
}
