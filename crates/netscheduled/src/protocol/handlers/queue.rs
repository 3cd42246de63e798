//! Job and queue inspection shared by submitters and workers.

use tracing::info;

use super::CommandContext;
use crate::protocol::arguments::Params;
use crate::protocol::response::{Fields, Response};
use crate::protocol::rollback::Outcome;
use crate::protocol::{CommandError, PROTOCOL_TARGET};
use crate::queue::JobSnapshot;

/// `STATUS job_key`
pub fn status(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let job = lookup(ctx, params)?;
    Ok(Response::fields(&Fields::new().with("job_status", job.status)).into())
}

/// `STATUS2 job_key`: status plus result and progress.
pub fn status_details(
    ctx: &mut CommandContext<'_>,
    params: &Params,
) -> Result<Outcome, CommandError> {
    let job = lookup(ctx, params)?;
    let fields = Fields::new()
        .with("job_status", job.status)
        .with("ret_code", job.return_code)
        .with("output", &job.output)
        .with("err_msg", &job.error_message)
        .with("progress_msg", &job.progress)
        .with("attempts", job.attempts);
    Ok(Response::fields(&fields).into())
}

/// `MPUT job_key progress_msg`
pub fn put_progress(
    ctx: &mut CommandContext<'_>,
    params: &Params,
) -> Result<Outcome, CommandError> {
    let id = ctx.job_id(params, "job_key")?;
    let queue = ctx.queue()?;
    ctx.queues()
        .set_progress(&queue, id, params.str("progress_msg"))?;
    Ok(Outcome::ok(""))
}

/// `MGET job_key`
pub fn get_progress(
    ctx: &mut CommandContext<'_>,
    params: &Params,
) -> Result<Outcome, CommandError> {
    let job = lookup(ctx, params)?;
    Ok(Response::fields(&Fields::new().with("progress_msg", &job.progress)).into())
}

/// `DUMP [job_key]`: one line per job, or only the named one.
pub fn dump(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    let jobs = match params.job("job_key") {
        Some(job) => vec![ctx.queues().job(&queue, job.id())?],
        None => ctx.queues().jobs(&queue)?,
    };
    let lines = jobs
        .iter()
        .map(|job| dump_line(ctx, job).map(|fields| fields.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Response::listing(lines).into())
}

fn dump_line(ctx: &CommandContext<'_>, job: &JobSnapshot) -> Result<Fields, CommandError> {
    Ok(Fields::new()
        .with("job_key", ctx.job_key(job.id)?)
        .with("status", job.status)
        .with("input", &job.submission.input)
        .with("aff", &job.submission.affinity)
        .with("mask", job.submission.mask)
        .with("client_ip", &job.submission.client_ip)
        .with("client_sid", &job.submission.client_sid)
        .with("attempts", job.attempts)
        .with("ret_code", job.return_code)
        .with("output", &job.output)
        .with("err_msg", &job.error_message)
        .with("progress_msg", &job.progress))
}

/// `GETP`: limits clients must respect on this server.
pub fn parameters(ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    let limits = ctx.server().limits();
    let fields = Fields::new()
        .with("queue", queue)
        .with("max_input_size", limits.max_input_size)
        .with("max_output_size", limits.max_input_size)
        .with("max_batch_size", limits.max_batch_size)
        .with("max_wait", limits.max_wait.as_secs())
        .with("run_timeout", limits.run_timeout.as_secs());
    Ok(Response::fields(&fields).into())
}

/// `GETC`: clients seen on the bound queue.
pub fn clients(ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    let clients = ctx.queues().clients(&queue)?;
    let nodes: Vec<&str> = clients.iter().map(|client| client.node.as_str()).collect();
    let fields = Fields::new()
        .with("clients", clients.len())
        .with("nodes", nodes.join(","));
    Ok(Response::fields(&fields).into())
}

/// `CLRN`: forgets the calling node, returning its running jobs.
pub fn clear_node(ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    let node = ctx.identity.node();
    let returned = ctx.queues().clear_worker(&queue, &node)?;
    info!(target: PROTOCOL_TARGET, %queue, %node, returned, "worker node cleared");
    Ok(Outcome::ok(""))
}

/// `CANCELQ`: cancels every unfinished job of the bound queue.
pub fn cancel_all(ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    let cancelled = ctx.queues().cancel_all(&queue)?;
    info!(target: PROTOCOL_TARGET, %queue, cancelled, "queue cancelled");
    Ok(Outcome::ok(""))
}

fn lookup(ctx: &CommandContext<'_>, params: &Params) -> Result<JobSnapshot, CommandError> {
    let id = ctx.job_id(params, "job_key")?;
    let queue = ctx.queue()?;
    Ok(ctx.queues().job(&queue, id)?)
}
