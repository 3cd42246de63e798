//! Server and queue administration.

use serde_json::Value;
use tracing::info;

use super::CommandContext;
use crate::protocol::arguments::Params;
use crate::protocol::response::Response;
use crate::protocol::rollback::Outcome;
use crate::protocol::{CommandError, PROTOCOL_TARGET};
use crate::server::ShutdownMode;

/// `SHUTDOWN [mode]` with `mode` one of `normal`, `now`, `die`, `drain`.
pub fn shutdown(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let requested = params.str("mode");
    let mode: ShutdownMode = requested.parse().map_err(|_| {
        CommandError::invalid_parameter(format!("unknown shutdown mode '{requested}'"))
    })?;
    info!(
        target: PROTOCOL_TARGET,
        %mode,
        client = %ctx.identity.client_name,
        peer = %ctx.identity.address,
        "shutdown requested by client"
    );
    ctx.server().request_shutdown(mode);
    Ok(Outcome::ok(""))
}

/// `GETCONF`: one `name=value` line per effective setting.
pub fn get_config(ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    let config = ctx.server().config();
    let value = serde_json::to_value(config.as_ref())
        .map_err(|error| CommandError::internal(format!("cannot render configuration: {error}")))?;
    let Value::Object(settings) = value else {
        return Err(CommandError::internal("configuration is not a map"));
    };
    let lines = settings
        .into_iter()
        .map(|(name, value)| match value {
            Value::String(text) => format!("{name}={text}"),
            Value::Null => format!("{name}="),
            other => format!("{name}={other}"),
        })
        .collect();
    Ok(Response::listing(lines).into())
}

/// `RECO`: reloads configuration and replaces the runtime settings.
pub fn reconfigure(ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    let loader = ctx
        .services()
        .reloader
        .as_ref()
        .ok_or_else(|| CommandError::invalid_parameter("configuration reload is not available"))?;
    let config = loader.load().map_err(|error| {
        CommandError::invalid_parameter(format!("configuration reload failed: {error}"))
    })?;
    ctx.server().reconfigure(config);
    Ok(Outcome::ok(""))
}

/// `ACNT`: number of connections currently served.
pub fn active_connections(
    ctx: &mut CommandContext<'_>,
    _params: &Params,
) -> Result<Outcome, CommandError> {
    Ok(Outcome::ok(ctx.server().active_connections().to_string()))
}

/// `DROPQ`: removes every job from the bound queue.
pub fn drop_jobs(ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    let queue = ctx.queue()?;
    let dropped = ctx.queues().drop_jobs(&queue)?;
    info!(target: PROTOCOL_TARGET, %queue, dropped, "queue emptied");
    Ok(Outcome::ok(""))
}

/// `QCRE qname qclass [description]`
pub fn create_queue(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let name = params.str("qname");
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(CommandError::invalid_parameter(format!("invalid queue name '{name}'")));
    }
    ctx.queues()
        .create_queue(name, params.str("qclass"), params.str("description"))?;
    Ok(Outcome::ok(""))
}

/// `QDEL qname`
pub fn delete_queue(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    ctx.queues().delete_queue(params.str("qname"))?;
    Ok(Outcome::ok(""))
}
