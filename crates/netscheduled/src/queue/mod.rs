//! Queue service seam.
//!
//! The protocol engine never touches job storage directly. Every queue
//! mutation and query goes through [`QueueService`]; the crate ships the
//! in-memory [`MemoryQueueService`] used by the server binary and the tests.

mod errors;
mod memory;
mod types;

pub use errors::QueueError;
pub use memory::MemoryQueueService;
pub use types::{
    AffinityUpdate, ClientRecord, JobResult, JobSnapshot, JobStatus, JobSubmission, LeasedJob,
    PullRequest, QueueInfo, QueueKind, ReadLease, ReadOutcome,
};

use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Store and scheduler collaborator used by command handlers.
///
/// Implementations synchronise internally; callers never hold a lock across
/// a network write. Blocking operations return early once `cancel` is set.
pub trait QueueService: Send + Sync {
    /// Names of every queue, sorted.
    fn queue_names(&self) -> Vec<String>;

    /// Returns `true` when `name` resolves to a queue.
    fn has_queue(&self, name: &str) -> bool;

    /// Describes a queue together with its job counts.
    fn queue_info(&self, name: &str) -> Result<QueueInfo, QueueError>;

    /// Creates a dynamic queue from a configured class.
    fn create_queue(&self, name: &str, class: &str, description: &str) -> Result<(), QueueError>;

    /// Deletes a dynamic queue and its jobs.
    fn delete_queue(&self, name: &str) -> Result<(), QueueError>;

    /// Removes every job from a queue, returning how many were dropped.
    fn drop_jobs(&self, queue: &str) -> Result<usize, QueueError>;

    /// Submits jobs atomically, returning the first of their consecutive ids.
    fn submit(&self, queue: &str, jobs: Vec<JobSubmission>) -> Result<u64, QueueError>;

    /// Erases jobs outright; used to undo a submission.
    fn erase(&self, queue: &str, ids: &[u64]) -> Result<(), QueueError>;

    /// Returns a snapshot of one job.
    fn job(&self, queue: &str, id: u64) -> Result<JobSnapshot, QueueError>;

    /// Returns snapshots of every job in the queue, ordered by id.
    fn jobs(&self, queue: &str) -> Result<Vec<JobSnapshot>, QueueError>;

    /// Cancels a job that has not finished.
    fn cancel(&self, queue: &str, id: u64) -> Result<(), QueueError>;

    /// Cancels every unfinished job, returning how many were affected.
    fn cancel_all(&self, queue: &str) -> Result<usize, QueueError>;

    /// Stores a progress message on a job.
    fn set_progress(&self, queue: &str, id: u64, message: &str) -> Result<(), QueueError>;

    /// Leases a pending job to a worker, waiting up to `wait` for one.
    fn pull(
        &self,
        queue: &str,
        request: &PullRequest,
        wait: Duration,
        cancel: &AtomicBool,
    ) -> Result<Option<LeasedJob>, QueueError>;

    /// Returns a running job to the pending state.
    ///
    /// When `count_attempt` is `false` the lease is forgotten entirely, as if
    /// the job had never been handed out.
    fn return_job(&self, queue: &str, id: u64, count_attempt: bool) -> Result<(), QueueError>;

    /// Records a successful result for a running job.
    fn complete(&self, queue: &str, id: u64, result: JobResult) -> Result<(), QueueError>;

    /// Records a failure for a running job.
    fn fail(&self, queue: &str, id: u64, message: &str, result: JobResult)
    -> Result<(), QueueError>;

    /// Extends the lease of a running job.
    fn extend_lease(&self, queue: &str, id: u64, timeout: Duration) -> Result<(), QueueError>;

    /// Hands a finished job to a reader, waiting up to `wait` for one.
    fn read(
        &self,
        queue: &str,
        wait: Duration,
        cancel: &AtomicBool,
    ) -> Result<Option<ReadLease>, QueueError>;

    /// Confirms, fails or rolls back a read handed out by [`Self::read`].
    fn finish_read(
        &self,
        queue: &str,
        id: u64,
        token: &str,
        outcome: &ReadOutcome,
    ) -> Result<(), QueueError>;

    /// Preferred affinities of a worker node.
    fn worker_affinities(&self, queue: &str, worker: &str) -> Result<Vec<String>, QueueError>;

    /// Changes the preferred affinities of a worker node.
    fn update_affinities(
        &self,
        queue: &str,
        worker: &str,
        update: &AffinityUpdate,
    ) -> Result<(), QueueError>;

    /// Pending job counts per affinity token.
    fn affinity_counts(&self, queue: &str) -> Result<Vec<(String, usize)>, QueueError>;

    /// Forgets a worker node: clears its affinities and returns its running
    /// jobs to the queue. Returns the number of jobs returned.
    fn clear_worker(&self, queue: &str, worker: &str) -> Result<usize, QueueError>;

    /// Records client activity on a queue.
    fn touch_client(&self, queue: &str, client: ClientRecord) -> Result<(), QueueError>;

    /// Clients seen on a queue, ordered by node name.
    fn clients(&self, queue: &str) -> Result<Vec<ClientRecord>, QueueError>;
}
