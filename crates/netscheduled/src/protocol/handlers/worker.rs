//! Job leasing, results and worker affinities.

use std::time::Duration;

use tracing::debug;

use super::{CommandContext, affinity_tokens};
use crate::protocol::arguments::Params;
use crate::protocol::response::{Fields, Response};
use crate::protocol::rollback::{Outcome, Rollback};
use crate::protocol::{CommandError, PROTOCOL_TARGET};
use crate::queue::{AffinityUpdate, JobResult, PullRequest};

/// `GET [aff port]`: leases a job, falling back to any affinity.
pub fn get(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let request = PullRequest {
        worker: ctx.identity.node(),
        affinities: affinity_tokens(params.str("aff")),
        any_affinity: true,
        exclusive_new: false,
    };
    lease(ctx, &request, Duration::ZERO)
}

/// `GET2 [aff any_aff exclusive_new_aff]`
pub fn get2(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let request = PullRequest {
        worker: ctx.identity.node(),
        affinities: affinity_tokens(params.str("aff")),
        any_affinity: params.int("any_aff") != 0,
        exclusive_new: params.int("exclusive_new_aff") != 0,
    };
    lease(ctx, &request, Duration::ZERO)
}

/// `WGET timeout [aff]`: blocks up to `timeout` seconds for a job.
pub fn wait_get(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let request = PullRequest {
        worker: ctx.identity.node(),
        affinities: affinity_tokens(params.str("aff")),
        any_affinity: true,
        exclusive_new: false,
    };
    let wait = ctx.wait(params.int("timeout"));
    lease(ctx, &request, wait)
}

fn lease(
    ctx: &CommandContext<'_>,
    request: &PullRequest,
    wait: Duration,
) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    let Some(leased) = ctx
        .queues()
        .pull(&queue, request, wait, ctx.cancel_flag())?
    else {
        return Ok(Outcome::ok(""));
    };
    let job = &leased.job;
    debug!(
        target: PROTOCOL_TARGET,
        request_id = ctx.request_id,
        job_id = job.id,
        worker = %request.worker,
        "job leased"
    );
    let fields = Fields::new()
        .with("job_key", ctx.job_key(job.id)?)
        .with("input", &job.submission.input)
        .with("affinity", &job.submission.affinity)
        .with("mask", job.submission.mask)
        .with("auth_token", &leased.auth_token);
    Ok(Outcome::Guarded {
        reply: Response::fields(&fields),
        rollback: Rollback::GetJob { queue, id: job.id },
    })
}

/// `PUT job_key job_return_code [output]`
pub fn put(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let id = ctx.job_id(params, "job_key")?;
    let queue = ctx.queue()?;
    ctx.queues().complete(&queue, id, result(params)?)?;
    Ok(Outcome::ok(""))
}

/// `RETURN job_key`: gives a leased job back, counting the attempt.
pub fn return_job(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let id = ctx.job_id(params, "job_key")?;
    let queue = ctx.queue()?;
    ctx.queues().return_job(&queue, id, true)?;
    Ok(Outcome::ok(""))
}

/// `FPUT job_key err_msg [output job_return_code]`
pub fn fail(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let id = ctx.job_id(params, "job_key")?;
    let queue = ctx.queue()?;
    ctx.queues()
        .fail(&queue, id, params.str("err_msg"), result(params)?)?;
    Ok(Outcome::ok(""))
}

/// `JXCG [job_key job_return_code] [output]`: reports a result, if any, and
/// leases the next job.
pub fn exchange(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    if let Some(job) = params.job("job_key") {
        let queue = ctx.queue()?;
        ctx.queues().complete(&queue, job.id(), result(params)?)?;
    }
    let request = PullRequest {
        worker: ctx.identity.node(),
        any_affinity: true,
        ..PullRequest::default()
    };
    lease(ctx, &request, Duration::ZERO)
}

fn result(params: &Params) -> Result<JobResult, CommandError> {
    let code = params.int("job_return_code");
    let return_code = i32::try_from(code).map_err(|_| {
        CommandError::invalid_parameter(format!("job_return_code={code} is out of range"))
    })?;
    Ok(JobResult {
        return_code,
        output: params.str("output").to_owned(),
    })
}

/// `JDEX job_key timeout`: extends a running job's lease.
pub fn extend_lease(
    ctx: &mut CommandContext<'_>,
    params: &Params,
) -> Result<Outcome, CommandError> {
    let id = ctx.job_id(params, "job_key")?;
    let seconds = params.int("timeout");
    let timeout = u64::try_from(seconds)
        .ok()
        .filter(|seconds| *seconds > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            CommandError::invalid_parameter(format!("timeout={seconds} must be positive"))
        })?;
    let queue = ctx.queue()?;
    ctx.queues().extend_lease(&queue, id, timeout)?;
    Ok(Outcome::ok(""))
}

/// `CHAFF [add del]`
pub fn change_affinity(
    ctx: &mut CommandContext<'_>,
    params: &Params,
) -> Result<Outcome, CommandError> {
    let update = AffinityUpdate::Modify {
        add: affinity_tokens(params.str("add")),
        remove: affinity_tokens(params.str("del")),
    };
    update_affinities(ctx, &update)
}

/// `SETAFF [aff]`
pub fn set_affinity(
    ctx: &mut CommandContext<'_>,
    params: &Params,
) -> Result<Outcome, CommandError> {
    let update = AffinityUpdate::Replace(affinity_tokens(params.str("aff")));
    update_affinities(ctx, &update)
}

fn update_affinities(
    ctx: &CommandContext<'_>,
    update: &AffinityUpdate,
) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    ctx.queues()
        .update_affinities(&queue, &ctx.identity.node(), update)?;
    Ok(Outcome::ok(""))
}

/// `CWGET`: nothing is registered for notification, so there is nothing to
/// cancel.
pub fn cancel_wait(
    _ctx: &mut CommandContext<'_>,
    _params: &Params,
) -> Result<Outcome, CommandError> {
    Ok(Outcome::ok(""))
}

/// `AFLS`: pending jobs per affinity.
pub fn affinity_list(
    ctx: &mut CommandContext<'_>,
    _params: &Params,
) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    let lines = ctx
        .queues()
        .affinity_counts(&queue)?
        .into_iter()
        .map(|(affinity, pending)| {
            Fields::new()
                .with("affinity", affinity)
                .with("pending", pending)
                .to_string()
        })
        .collect();
    Ok(Response::listing(lines).into())
}
