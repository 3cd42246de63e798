//! In-memory queue store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use netschedule_config::Config;
use tracing::debug;

use super::{
    AffinityUpdate, ClientRecord, JobResult, JobSnapshot, JobStatus, JobSubmission, LeasedJob,
    PullRequest, QueueError, QueueInfo, QueueKind, QueueService, ReadLease, ReadOutcome,
};

const QUEUE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::queue");
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Queue store that keeps every job in process memory.
///
/// One mutex guards the whole registry; a condition variable wakes blocked
/// `pull`/`read` calls whenever jobs change state.
#[derive(Debug)]
pub struct MemoryQueueService {
    registry: Mutex<Registry>,
    changed: Condvar,
    classes: BTreeSet<String>,
    default_run_timeout: Duration,
}

#[derive(Debug, Default)]
struct Registry {
    queues: BTreeMap<String, QueueState>,
    next_id: u64,
    next_token: u64,
}

#[derive(Debug)]
struct QueueState {
    kind: QueueKind,
    class: String,
    description: String,
    jobs: BTreeMap<u64, StoredJob>,
    affinities: BTreeMap<String, BTreeSet<String>>,
    clients: BTreeMap<String, ClientRecord>,
}

impl QueueState {
    fn new(kind: QueueKind, class: &str, description: &str) -> Self {
        Self {
            kind,
            class: class.to_owned(),
            description: description.to_owned(),
            jobs: BTreeMap::new(),
            affinities: BTreeMap::new(),
            clients: BTreeMap::new(),
        }
    }

    fn job_mut(&mut self, id: u64) -> Result<&mut StoredJob, QueueError> {
        self.jobs.get_mut(&id).ok_or(QueueError::JobNotFound { id })
    }

    fn expire_leases(&mut self, now: Instant) {
        for stored in self.jobs.values_mut() {
            let expired = stored
                .lease
                .as_ref()
                .is_some_and(|lease| lease.deadline <= now);
            if expired && stored.job.status == JobStatus::Running {
                debug!(target: QUEUE_TARGET, id = stored.job.id, "job lease expired");
                stored.job.status = JobStatus::Pending;
                stored.lease = None;
            }
        }
    }

    fn select(&self, request: &PullRequest) -> Option<u64> {
        let mut pending = self
            .jobs
            .values()
            .filter(|stored| stored.job.status == JobStatus::Pending);
        let preferred: BTreeSet<&str> = if request.affinities.is_empty() {
            self.affinities
                .get(&request.worker)
                .map(|set| set.iter().map(String::as_str).collect())
                .unwrap_or_default()
        } else {
            request.affinities.iter().map(String::as_str).collect()
        };

        if !preferred.is_empty()
            && let Some(stored) = pending
                .clone()
                .find(|stored| preferred.contains(stored.job.submission.affinity.as_str()))
        {
            return Some(stored.job.id);
        }

        if request.exclusive_new {
            let claimed: BTreeSet<&str> = self
                .affinities
                .iter()
                .filter(|(worker, _)| **worker != request.worker)
                .flat_map(|(_, set)| set.iter().map(String::as_str))
                .collect();
            if let Some(stored) = pending.clone().find(|stored| {
                let affinity = stored.job.submission.affinity.as_str();
                !affinity.is_empty() && !claimed.contains(affinity)
            }) {
                return Some(stored.job.id);
            }
        }

        if preferred.is_empty() || request.any_affinity {
            return pending.next().map(|stored| stored.job.id);
        }
        None
    }
}

#[derive(Debug)]
struct StoredJob {
    job: JobSnapshot,
    lease: Option<Lease>,
    read: Option<ReadState>,
}

#[derive(Debug)]
struct Lease {
    worker: String,
    deadline: Instant,
}

#[derive(Debug)]
struct ReadState {
    token: String,
    previous: JobStatus,
}

impl Registry {
    fn queue(&self, name: &str) -> Result<&QueueState, QueueError> {
        self.queues
            .get(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_owned()))
    }

    fn queue_mut(&mut self, name: &str) -> Result<&mut QueueState, QueueError> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_owned()))
    }

    fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn try_lease(
        &mut self,
        queue: &str,
        request: &PullRequest,
        run_timeout: Duration,
    ) -> Result<Option<LeasedJob>, QueueError> {
        let token = self.next_token();
        let state = self.queue_mut(queue)?;
        let now = Instant::now();
        state.expire_leases(now);
        let Some(id) = state.select(request) else {
            return Ok(None);
        };
        let stored = state.job_mut(id)?;
        stored.job.status = JobStatus::Running;
        stored.job.attempts += 1;
        stored.lease = Some(Lease {
            worker: request.worker.clone(),
            deadline: now + run_timeout,
        });
        let job = stored.job.clone();
        if request.exclusive_new && !job.submission.affinity.is_empty() {
            state
                .affinities
                .entry(request.worker.clone())
                .or_default()
                .insert(job.submission.affinity.clone());
        }
        Ok(Some(LeasedJob {
            auth_token: format!("{id}_{token}"),
            job,
        }))
    }

    fn try_read(&mut self, queue: &str) -> Result<Option<ReadLease>, QueueError> {
        let token = self.next_token();
        let state = self.queue_mut(queue)?;
        let Some(stored) = state
            .jobs
            .values_mut()
            .find(|stored| stored.job.status.is_readable() && stored.read.is_none())
        else {
            return Ok(None);
        };
        let previous = stored.job.status;
        let auth_token = format!("R{}_{token}", stored.job.id);
        stored.job.status = JobStatus::Reading;
        stored.read = Some(ReadState {
            token: auth_token.clone(),
            previous,
        });
        Ok(Some(ReadLease {
            id: stored.job.id,
            status: previous,
            auth_token,
        }))
    }
}

impl MemoryQueueService {
    /// Creates a store with the given static queues and dynamic queue classes.
    #[must_use]
    pub fn new<Q, C>(queues: Q, classes: C) -> Self
    where
        Q: IntoIterator,
        Q::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let mut registry = Registry::default();
        for name in queues {
            registry
                .queues
                .insert(name.into(), QueueState::new(QueueKind::Static, "", ""));
        }
        Self {
            registry: Mutex::new(registry),
            changed: Condvar::new(),
            classes: classes.into_iter().map(Into::into).collect(),
            default_run_timeout: Duration::from_secs(netschedule_config::DEFAULT_RUN_TIMEOUT_SECS),
        }
    }

    /// Creates a store with the queues and classes named in configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.queues.iter().cloned(), config.queue_classes.iter().cloned())
            .with_run_timeout(Duration::from_secs(config.run_timeout_secs))
    }

    /// Sets the lease granted to pulled jobs.
    #[must_use]
    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.default_run_timeout = run_timeout;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Registry>, QueueError> {
        self.registry
            .lock()
            .map_err(|_| QueueError::storage("queue registry lock poisoned"))
    }

    fn with_queue<T>(
        &self,
        queue: &str,
        action: impl FnOnce(&mut QueueState) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let mut registry = self.lock()?;
        let state = registry.queue_mut(queue)?;
        let result = action(state)?;
        drop(registry);
        self.changed.notify_all();
        Ok(result)
    }

    fn wait_for<T>(
        &self,
        wait: Duration,
        cancel: &AtomicBool,
        mut attempt: impl FnMut(&mut Registry) -> Result<Option<T>, QueueError>,
    ) -> Result<Option<T>, QueueError> {
        let deadline = Instant::now() + wait;
        let mut registry = self.lock()?;
        loop {
            if let Some(found) = attempt(&mut registry)? {
                return Ok(Some(found));
            }
            let now = Instant::now();
            if cancel.load(Ordering::SeqCst) || now >= deadline {
                return Ok(None);
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            registry = self
                .changed
                .wait_timeout(registry, slice)
                .map_err(|_| QueueError::storage("queue registry lock poisoned"))?
                .0;
        }
    }
}

impl QueueService for MemoryQueueService {
    fn queue_names(&self) -> Vec<String> {
        self.lock()
            .map(|registry| registry.queues.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn has_queue(&self, name: &str) -> bool {
        self.lock()
            .is_ok_and(|registry| registry.queues.contains_key(name))
    }

    fn queue_info(&self, name: &str) -> Result<QueueInfo, QueueError> {
        let registry = self.lock()?;
        let state = registry.queue(name)?;
        let mut counts: BTreeMap<JobStatus, usize> =
            JobStatus::ALL.iter().map(|status| (*status, 0)).collect();
        for stored in state.jobs.values() {
            *counts.entry(stored.job.status).or_default() += 1;
        }
        Ok(QueueInfo {
            name: name.to_owned(),
            kind: state.kind,
            class: state.class.clone(),
            description: state.description.clone(),
            counts,
        })
    }

    fn create_queue(&self, name: &str, class: &str, description: &str) -> Result<(), QueueError> {
        if !self.classes.contains(class) {
            return Err(QueueError::UnknownClass(class.to_owned()));
        }
        let mut registry = self.lock()?;
        if registry.queues.contains_key(name) {
            return Err(QueueError::QueueExists(name.to_owned()));
        }
        registry.queues.insert(
            name.to_owned(),
            QueueState::new(QueueKind::Dynamic, class, description),
        );
        debug!(target: QUEUE_TARGET, queue = name, class, "dynamic queue created");
        Ok(())
    }

    fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        let mut registry = self.lock()?;
        let kind = registry.queue(name)?.kind;
        if kind == QueueKind::Static {
            return Err(QueueError::StaticQueue(name.to_owned()));
        }
        registry.queues.remove(name);
        debug!(target: QUEUE_TARGET, queue = name, "dynamic queue deleted");
        Ok(())
    }

    fn drop_jobs(&self, queue: &str) -> Result<usize, QueueError> {
        self.with_queue(queue, |state| {
            let dropped = state.jobs.len();
            state.jobs.clear();
            Ok(dropped)
        })
    }

    fn submit(&self, queue: &str, jobs: Vec<JobSubmission>) -> Result<u64, QueueError> {
        let mut registry = self.lock()?;
        registry.queue(queue)?;
        if jobs.is_empty() {
            return Ok(0);
        }
        let first = registry.next_id + 1;
        let count = u64::try_from(jobs.len())
            .map_err(|_| QueueError::storage("job count exceeds id space"))?;
        registry.next_id += count;
        let state = registry.queue_mut(queue)?;
        for (id, submission) in (first..).zip(jobs) {
            let job = JobSnapshot {
                id,
                queue: queue.to_owned(),
                status: JobStatus::Pending,
                submission,
                output: String::new(),
                error_message: String::new(),
                return_code: 0,
                progress: String::new(),
                attempts: 0,
            };
            state.jobs.insert(
                id,
                StoredJob {
                    job,
                    lease: None,
                    read: None,
                },
            );
        }
        drop(registry);
        self.changed.notify_all();
        Ok(first)
    }

    fn erase(&self, queue: &str, ids: &[u64]) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            for id in ids {
                state.jobs.remove(id);
            }
            Ok(())
        })
    }

    fn job(&self, queue: &str, id: u64) -> Result<JobSnapshot, QueueError> {
        let registry = self.lock()?;
        registry
            .queue(queue)?
            .jobs
            .get(&id)
            .map(|stored| stored.job.clone())
            .ok_or(QueueError::JobNotFound { id })
    }

    fn jobs(&self, queue: &str) -> Result<Vec<JobSnapshot>, QueueError> {
        let registry = self.lock()?;
        Ok(registry
            .queue(queue)?
            .jobs
            .values()
            .map(|stored| stored.job.clone())
            .collect())
    }

    fn cancel(&self, queue: &str, id: u64) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            let stored = state.job_mut(id)?;
            match stored.job.status {
                JobStatus::Pending | JobStatus::Running => {
                    stored.job.status = JobStatus::Canceled;
                    stored.lease = None;
                    Ok(())
                }
                JobStatus::Canceled => Ok(()),
                status => Err(QueueError::invalid_status(id, status, "cancel")),
            }
        })
    }

    fn cancel_all(&self, queue: &str) -> Result<usize, QueueError> {
        self.with_queue(queue, |state| {
            let mut cancelled = 0;
            for stored in state.jobs.values_mut() {
                if matches!(stored.job.status, JobStatus::Pending | JobStatus::Running) {
                    stored.job.status = JobStatus::Canceled;
                    stored.lease = None;
                    cancelled += 1;
                }
            }
            Ok(cancelled)
        })
    }

    fn set_progress(&self, queue: &str, id: u64, message: &str) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            state.job_mut(id)?.job.progress = message.to_owned();
            Ok(())
        })
    }

    fn pull(
        &self,
        queue: &str,
        request: &PullRequest,
        wait: Duration,
        cancel: &AtomicBool,
    ) -> Result<Option<LeasedJob>, QueueError> {
        let run_timeout = self.default_run_timeout;
        self.wait_for(wait, cancel, |registry| {
            registry.try_lease(queue, request, run_timeout)
        })
    }

    fn return_job(&self, queue: &str, id: u64, count_attempt: bool) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            let stored = state.job_mut(id)?;
            if stored.job.status != JobStatus::Running {
                return Err(QueueError::invalid_status(id, stored.job.status, "return"));
            }
            stored.job.status = JobStatus::Pending;
            stored.lease = None;
            if !count_attempt {
                stored.job.attempts = stored.job.attempts.saturating_sub(1);
            }
            Ok(())
        })
    }

    fn complete(&self, queue: &str, id: u64, result: JobResult) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            let stored = state.job_mut(id)?;
            if stored.job.status != JobStatus::Running {
                return Err(QueueError::invalid_status(id, stored.job.status, "complete"));
            }
            stored.job.status = JobStatus::Done;
            stored.job.return_code = result.return_code;
            stored.job.output = result.output;
            stored.lease = None;
            Ok(())
        })
    }

    fn fail(
        &self,
        queue: &str,
        id: u64,
        message: &str,
        result: JobResult,
    ) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            let stored = state.job_mut(id)?;
            if stored.job.status != JobStatus::Running {
                return Err(QueueError::invalid_status(id, stored.job.status, "fail"));
            }
            stored.job.status = JobStatus::Failed;
            stored.job.error_message = message.to_owned();
            stored.job.return_code = result.return_code;
            stored.job.output = result.output;
            stored.lease = None;
            Ok(())
        })
    }

    fn extend_lease(&self, queue: &str, id: u64, timeout: Duration) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            let stored = state.job_mut(id)?;
            let status = stored.job.status;
            match stored.lease.as_mut() {
                Some(lease) if status == JobStatus::Running => {
                    lease.deadline = Instant::now() + timeout;
                    Ok(())
                }
                _ => Err(QueueError::invalid_status(id, status, "extend the lease of")),
            }
        })
    }

    fn read(
        &self,
        queue: &str,
        wait: Duration,
        cancel: &AtomicBool,
    ) -> Result<Option<ReadLease>, QueueError> {
        self.wait_for(wait, cancel, |registry| registry.try_read(queue))
    }

    fn finish_read(
        &self,
        queue: &str,
        id: u64,
        token: &str,
        outcome: &ReadOutcome,
    ) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            let stored = state.job_mut(id)?;
            let Some(read) = stored.read.as_ref() else {
                return Err(QueueError::invalid_status(id, stored.job.status, "finish reading"));
            };
            if read.token != token {
                return Err(QueueError::InvalidAuthToken { id });
            }
            stored.job.status = match outcome {
                ReadOutcome::Confirm => JobStatus::Confirmed,
                ReadOutcome::Fail(message) => {
                    stored.job.error_message.clone_from(message);
                    JobStatus::ReadFailed
                }
                ReadOutcome::Rollback => read.previous,
            };
            stored.read = None;
            Ok(())
        })
    }

    fn worker_affinities(&self, queue: &str, worker: &str) -> Result<Vec<String>, QueueError> {
        let registry = self.lock()?;
        Ok(registry
            .queue(queue)?
            .affinities
            .get(worker)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn update_affinities(
        &self,
        queue: &str,
        worker: &str,
        update: &AffinityUpdate,
    ) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            let set = state.affinities.entry(worker.to_owned()).or_default();
            match update {
                AffinityUpdate::Modify { add, remove } => {
                    set.extend(add.iter().cloned());
                    for token in remove {
                        set.remove(token);
                    }
                }
                AffinityUpdate::Replace(tokens) => {
                    *set = tokens.iter().cloned().collect();
                }
            }
            if set.is_empty() {
                state.affinities.remove(worker);
            }
            Ok(())
        })
    }

    fn affinity_counts(&self, queue: &str) -> Result<Vec<(String, usize)>, QueueError> {
        let registry = self.lock()?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for stored in registry.queue(queue)?.jobs.values() {
            let affinity = &stored.job.submission.affinity;
            if stored.job.status == JobStatus::Pending && !affinity.is_empty() {
                *counts.entry(affinity.clone()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    fn clear_worker(&self, queue: &str, worker: &str) -> Result<usize, QueueError> {
        self.with_queue(queue, |state| {
            state.affinities.remove(worker);
            let mut returned = 0;
            for stored in state.jobs.values_mut() {
                let owned = stored
                    .lease
                    .as_ref()
                    .is_some_and(|lease| lease.worker == worker);
                if owned && stored.job.status == JobStatus::Running {
                    stored.job.status = JobStatus::Pending;
                    stored.lease = None;
                    returned += 1;
                }
            }
            Ok(returned)
        })
    }

    fn touch_client(&self, queue: &str, mut client: ClientRecord) -> Result<(), QueueError> {
        client.last_seen = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        let mut registry = self.lock()?;
        let state = registry.queue_mut(queue)?;
        state.clients.insert(client.node.clone(), client);
        Ok(())
    }

    fn clients(&self, queue: &str) -> Result<Vec<ClientRecord>, QueueError> {
        let registry = self.lock()?;
        Ok(registry.queue(queue)?.clients.values().cloned().collect())
    }
}
