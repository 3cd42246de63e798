//! Batch submission sub-protocol.
//!
//! `BSUB` opens an explicit session that may carry several batches and ends
//! with `ENDS`. A `BTCH` sent straight from the command loop opens an
//! implicit session covering a single batch. Each batch is `BTCH size=N`,
//! exactly `N` job lines, then `ENDB`, which submits every job at once.

use std::time::Instant;

use tracing::{debug, info, info_span};

use super::arguments::{Params, bind, tokenize};
use super::handlers::CommandContext;
use super::handlers::submitter::narrow;
use super::rollback::{Outcome, Rollback};
use super::session::SessionState;
use super::table::JOB_LINE_SPEC;
use super::CommandError;
use crate::queue::JobSubmission;
use crate::server::{Limits, OpenBatchGuard};

const BATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::batch");

/// An open batch session; counted as an open batch while alive.
#[derive(Debug)]
pub struct BatchSession {
    explicit: bool,
    notify: Notify,
    pending: Option<PendingBatch>,
    _guard: OpenBatchGuard,
}

/// Completion notification target stamped onto every job of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Notify {
    port: u16,
    timeout: u32,
}

impl Notify {
    fn from_params(params: &Params) -> Result<Self, CommandError> {
        Ok(Self {
            port: narrow(params, "port")?,
            timeout: narrow(params, "timeout")?,
        })
    }

    /// Fields set on `BTCH` win over the session's.
    fn or(self, fallback: Self) -> Self {
        Self {
            port: if self.port == 0 { fallback.port } else { self.port },
            timeout: if self.timeout == 0 {
                fallback.timeout
            } else {
                self.timeout
            },
        }
    }
}


#[derive(Debug)]
struct PendingBatch {
    expected: usize,
    notify: Notify,
    jobs: Vec<JobSubmission>,
    started: Instant,
    request_id: u64,
}

impl BatchSession {
    fn new(explicit: bool, notify: Notify, guard: OpenBatchGuard) -> Self {
        Self {
            explicit,
            notify,
            pending: None,
            _guard: guard,
        }
    }

    /// Returns `true` for sessions opened with `BSUB`.
    #[must_use]
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// Returns `true` between `BTCH` and `ENDB`.
    #[must_use]
    pub fn has_pending_batch(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns `true` while job lines are still expected.
    #[must_use]
    pub fn awaiting_jobs(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| pending.jobs.len() < pending.expected)
    }
}

/// `BSUB [port=P] [timeout=T]`: opens an explicit batch session.
pub fn begin_session(
    ctx: &mut CommandContext<'_>,
    params: &Params,
) -> Result<Outcome, CommandError> {
    ctx.ensure_submits_enabled()?;
    let queue = ctx.queue()?;
    let notify = Notify::from_params(params)?;
    ctx.state.batch = Some(BatchSession::new(true, notify, ctx.server().open_batch()));
    info!(target: BATCH_TARGET, request_id = ctx.request_id, %queue, "batch session opened");
    Ok(Outcome::ok("Batch submit ready"))
}

/// `BTCH size=N [port=P] [timeout=T]`: starts a batch, opening an implicit
/// session when none is open.
pub fn begin_batch(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let limit = ctx.server().limits().max_batch_size;
    let size = params.int("size");
    let expected = u32::try_from(size)
        .ok()
        .filter(|size| *size <= limit)
        .and_then(|size| usize::try_from(size).ok())
        .ok_or_else(|| {
            CommandError::invalid_parameter(format!("batch size {size} is outside 0..={limit}"))
        })?;
    let requested = Notify::from_params(params)?;

    if ctx.state.batch.is_none() {
        ctx.ensure_submits_enabled()?;
        ctx.state.batch = Some(BatchSession::new(
            false,
            Notify::default(),
            ctx.server().open_batch(),
        ));
    }
    let request_id = ctx.request_id;
    let session = ctx
        .state
        .batch
        .as_mut()
        .ok_or_else(|| CommandError::internal("batch session vanished"))?;
    session.pending = Some(PendingBatch {
        expected,
        notify: requested.or(session.notify),
        jobs: Vec::with_capacity(expected),
        started: Instant::now(),
        request_id,
    });
    debug!(target: BATCH_TARGET, request_id, expected, explicit = session.explicit, "batch started");
    Ok(Outcome::Silent)
}

/// Parses one job line into the pending batch.
///
/// # Errors
///
/// Returns a syntax error for malformed lines and `eInvalidParameter` for
/// oversized input or an out-of-range mask.
pub fn accept_job_line(
    state: &mut SessionState,
    line: &str,
    limits: Limits,
) -> Result<Outcome, CommandError> {
    let tokens = tokenize(line);
    let params = bind(JOB_LINE_SPEC, line, &tokens)?;
    let input = params.str("input");
    if input.len() > limits.max_input_size {
        return Err(CommandError::invalid_parameter(format!(
            "job input of {} bytes exceeds the {} byte limit",
            input.len(),
            limits.max_input_size
        )));
    }
    let mask = u32::try_from(params.int("msk"))
        .map_err(|_| CommandError::invalid_parameter("msk does not fit 32 bits"))?;

    let client_ip = state.identity.address.to_string();
    let client_sid = state.identity.client_session.clone();
    let pending = state
        .batch
        .as_mut()
        .and_then(|session| session.pending.as_mut())
        .ok_or_else(|| CommandError::internal("job line outside a batch"))?;
    pending.jobs.push(JobSubmission {
        input: input.to_owned(),
        affinity: params.str("aff").to_owned(),
        mask,
        client_ip,
        client_sid,
        notify_port: pending.notify.port,
        notify_timeout: pending.notify.timeout,
        ..JobSubmission::default()
    });
    Ok(Outcome::Silent)
}

/// `ENDB`: submits the pending batch atomically.
pub fn end_batch(ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    let session = ctx
        .state
        .batch
        .as_mut()
        .ok_or_else(|| CommandError::internal("ENDB outside a batch session"))?;
    let pending = session
        .pending
        .take()
        .ok_or_else(|| CommandError::internal("ENDB without BTCH"))?;
    if !session.explicit {
        ctx.state.batch = None;
    }

    let server = ctx.server();
    let count = pending.jobs.len();
    let span = info_span!(
        target: BATCH_TARGET,
        "batch_submit",
        parent_request_id = pending.request_id,
        request_id = ctx.request_id,
        %queue,
        jobs = count,
    );
    let _entered = span.enter();

    if count == 0 {
        info!(target: BATCH_TARGET, "empty batch acknowledged");
        return Ok(Outcome::ok(format!("0 {} {}", server.host(), server.port())));
    }

    let first = ctx.queues().submit(&queue, pending.jobs)?;
    let ids: Vec<u64> = (first..).take(count).collect();
    info!(
        target: BATCH_TARGET,
        first_job_id = first,
        elapsed_us = u64::try_from(pending.started.elapsed().as_micros()).unwrap_or(u64::MAX),
        "batch submitted"
    );
    Ok(Outcome::guarded(
        format!("{first} {} {}", server.host(), server.port()),
        Rollback::Submit { queue, ids },
    ))
}

/// `ENDS`: closes an explicit batch session.
pub fn end_session(
    ctx: &mut CommandContext<'_>,
    _params: &Params,
) -> Result<Outcome, CommandError> {
    ctx.state.batch = None;
    info!(target: BATCH_TARGET, request_id = ctx.request_id, "batch session closed");
    Ok(Outcome::ok(""))
}
