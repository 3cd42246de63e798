//! Submission, cancellation and the reader protocol.

use tracing::debug;

use super::CommandContext;
use crate::protocol::arguments::Params;
use crate::protocol::response::{Fields, Response};
use crate::protocol::rollback::{Outcome, Rollback};
use crate::protocol::{CommandError, PROTOCOL_TARGET};
use crate::queue::{JobSubmission, ReadOutcome};

/// `SUBMIT input [port timeout aff msk ip sid]`
pub fn submit(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    ctx.ensure_submits_enabled()?;
    let queue = ctx.queue()?;
    let input = params.str("input");
    let limit = ctx.server().limits().max_input_size;
    if input.len() > limit {
        return Err(CommandError::invalid_parameter(format!(
            "job input of {} bytes exceeds the {limit} byte limit",
            input.len()
        )));
    }

    let submission = JobSubmission {
        input: input.to_owned(),
        affinity: params.str("aff").to_owned(),
        mask: narrow(params, "msk")?,
        client_ip: or_default(params.str("ip"), || ctx.identity.address.to_string()),
        client_sid: or_default(params.str("sid"), || ctx.identity.client_session.clone()),
        notify_port: narrow(params, "port")?,
        notify_timeout: narrow(params, "timeout")?,
    };
    debug!(
        target: PROTOCOL_TARGET,
        request_id = ctx.request_id,
        input = %submission.input,
        "job input received"
    );

    let id = ctx.queues().submit(&queue, vec![submission])?;
    let key = ctx.job_key(id)?;
    Ok(Outcome::guarded(
        key.to_string(),
        Rollback::Submit {
            queue,
            ids: vec![id],
        },
    ))
}

pub(crate) fn narrow<T: TryFrom<i64>>(params: &Params, name: &str) -> Result<T, CommandError> {
    let value = params.int(name);
    T::try_from(value)
        .map_err(|_| CommandError::invalid_parameter(format!("{name}={value} is out of range")))
}

fn or_default(value: &str, fallback: impl FnOnce() -> String) -> String {
    if value.is_empty() {
        fallback()
    } else {
        value.to_owned()
    }
}

/// `CANCEL job_key`
pub fn cancel(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let id = ctx.job_id(params, "job_key")?;
    let queue = ctx.queue()?;
    ctx.queues().cancel(&queue, id)?;
    Ok(Outcome::ok(""))
}

/// `READ [timeout]`: hands out one finished job, or `OK:` when none is ready.
pub fn read(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    let wait = ctx.wait(params.int("timeout"));
    let Some(lease) = ctx.queues().read(&queue, wait, ctx.cancel_flag())? else {
        return Ok(Outcome::ok(""));
    };
    let fields = Fields::new()
        .with("job_key", ctx.job_key(lease.id)?)
        .with("auth_token", &lease.auth_token)
        .with("status", lease.status);
    Ok(Outcome::Guarded {
        reply: Response::fields(&fields),
        rollback: Rollback::Read {
            queue,
            id: lease.id,
            token: lease.auth_token,
        },
    })
}

/// `CFRM job_key auth_token`
pub fn confirm_read(
    ctx: &mut CommandContext<'_>,
    params: &Params,
) -> Result<Outcome, CommandError> {
    finish_read(ctx, params, &ReadOutcome::Confirm)
}

/// `FRED job_key auth_token [err_msg]`
pub fn fail_read(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let outcome = ReadOutcome::Fail(params.str("err_msg").to_owned());
    finish_read(ctx, params, &outcome)
}

/// `RDRB job_key auth_token`
pub fn rollback_read(
    ctx: &mut CommandContext<'_>,
    params: &Params,
) -> Result<Outcome, CommandError> {
    finish_read(ctx, params, &ReadOutcome::Rollback)
}

fn finish_read(
    ctx: &CommandContext<'_>,
    params: &Params,
    outcome: &ReadOutcome,
) -> Result<Outcome, CommandError> {
    let id = ctx.job_id(params, "job_key")?;
    let queue = ctx.queue()?;
    ctx.queues()
        .finish_read(&queue, id, params.str("auth_token"), outcome)?;
    Ok(Outcome::ok(""))
}
