//! Commands every client may run.

use std::sync::atomic::Ordering;

use netschedule_types::ErrorCode;

use super::CommandContext;
use crate::protocol::CommandError;
use crate::protocol::arguments::Params;
use crate::protocol::response::{Fields, Response};
use crate::protocol::rollback::Outcome;
use crate::queue::{JobStatus, QueueService};

/// Protocol revision reported by `VERSION`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// `VERSION`
pub fn version(_ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    let fields = Fields::new()
        .with("server_version", env!("CARGO_PKG_VERSION"))
        .with("protocol_version", PROTOCOL_VERSION)
        .with("server_name", env!("CARGO_PKG_NAME"));
    Ok(Response::fields(&fields).into())
}

/// `QUIT`
pub fn quit(_ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    Ok(Outcome::Close)
}

/// `QLST`: queue names separated by `;`.
pub fn queue_list(ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    Ok(Outcome::ok(ctx.queues().queue_names().join(";")))
}

/// `QINF qname`
pub fn queue_info(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let info = ctx.queues().queue_info(params.str("qname"))?;
    let fields = Fields::new()
        .with("kind", info.kind)
        .with("class", &info.class)
        .with("description", &info.description);
    Ok(Response::fields(&fields).into())
}

/// `QINF2 qname`: `QINF` plus job counts per status.
pub fn queue_info_with_counts(
    ctx: &mut CommandContext<'_>,
    params: &Params,
) -> Result<Outcome, CommandError> {
    let info = ctx.queues().queue_info(params.str("qname"))?;
    let mut fields = Fields::new()
        .with("kind", info.kind)
        .with("class", &info.class)
        .with("description", &info.description);
    for status in JobStatus::ALL {
        let count = info.counts.get(&status).copied().unwrap_or_default();
        fields = fields.with(&status.to_string(), count);
    }
    Ok(Response::fields(&fields).into())
}

/// `SETQUEUE [qname]`: rebinds the connection, recomputing its roles.
pub fn set_queue(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let policy = ctx.server().policy();
    let rebound = ctx
        .state
        .identity
        .bind(Some(params.str("qname")), &policy, ctx.queues())?;
    if let Some(queue) = rebound.queue.as_deref() {
        ctx.queues().touch_client(queue, rebound.record())?;
    }
    ctx.state.identity = rebound;
    Ok(Outcome::ok(""))
}

/// `STAT [option]`: server statistics; `JOBS` adds per-queue job counts and
/// `CLIENTS` per-queue client counts. A connection bound to a queue also gets
/// that queue's status counts and its clients.
pub fn statistics(ctx: &mut CommandContext<'_>, params: &Params) -> Result<Outcome, CommandError> {
    let option = params.str("option").to_ascii_uppercase();
    let server = ctx.server();
    let queues = ctx.queues();
    let mut lines = vec![
        format!("started={}", server.started_at()),
        format!("uptime={}", server.uptime().as_secs()),
        format!("active_connections={}", server.active_connections()),
        format!("open_batches={}", server.open_batches()),
        format!("draining={}", server.is_draining()),
        format!("submits_disabled={}", server.submits_disabled()),
        format!("queues={}", queues.queue_names().len()),
    ];
    if let Some(queue) = ctx.identity.queue.as_deref() {
        lines.extend(bound_queue_lines(queues, queue)?);
    }
    match option.as_str() {
        "" | "ALL" => {}
        "JOBS" => {
            for name in queues.queue_names() {
                let info = queues.queue_info(&name)?;
                let mut fields = Fields::new().with("queue", &name);
                for (status, count) in &info.counts {
                    fields = fields.with(&status.to_string(), count);
                }
                lines.push(fields.to_string());
            }
        }
        "CLIENTS" => {
            for name in queues.queue_names() {
                let clients = queues.clients(&name)?;
                lines.push(
                    Fields::new()
                        .with("queue", &name)
                        .with("clients", clients.len())
                        .to_string(),
                );
            }
        }
        other => {
            return Err(CommandError::invalid_parameter(format!(
                "unknown STAT option '{other}'"
            )));
        }
    }
    Ok(Response::listing(lines).into())
}

fn bound_queue_lines(queues: &dyn QueueService, queue: &str) -> Result<Vec<String>, CommandError> {
    let info = queues.queue_info(queue)?;
    let clients = queues.clients(queue)?;
    let mut counts = Fields::new().with("queue", queue);
    for status in JobStatus::ALL {
        let count = info.counts.get(&status).copied().unwrap_or_default();
        counts = counts.with(&status.to_string(), count);
    }
    let mut lines = vec![
        counts.to_string(),
        Fields::new()
            .with("queue", queue)
            .with("clients", clients.len())
            .to_string(),
    ];
    lines.extend(clients.iter().map(|client| {
        Fields::new()
            .with("client", &client.node)
            .with("session", &client.session)
            .with("address", &client.address)
            .with("program", &client.program)
            .to_string()
    }));
    Ok(lines)
}

/// `HEALTH`
pub fn health(ctx: &mut CommandContext<'_>, _params: &Params) -> Result<Outcome, CommandError> {
    let server = ctx.server();
    let status = if server.shutdown_flag().load(Ordering::SeqCst) {
        "shutting_down"
    } else if server.is_draining() {
        "draining"
    } else {
        "ok"
    };
    Ok(Response::listing(vec![
        format!("status={status}"),
        format!("uptime={}", server.uptime().as_secs()),
        format!("active_connections={}", server.active_connections()),
        format!("open_batches={}", server.open_batches()),
        format!("queues={}", ctx.queues().queue_names().len()),
    ])
    .into())
}

/// `REGC`, `URGC`, `INIT`: acknowledged and ignored.
pub fn obsolete_acknowledged(
    _ctx: &mut CommandContext<'_>,
    _params: &Params,
) -> Result<Outcome, CommandError> {
    Ok(Outcome::ok("WARNING:Obsolete command;"))
}

/// `JRTO`: no longer implemented.
pub fn obsolete_refused(
    _ctx: &mut CommandContext<'_>,
    _params: &Params,
) -> Result<Outcome, CommandError> {
    Err(CommandError::new(ErrorCode::ObsoleteCommand, "Not implemented"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RoleMask;
    use crate::protocol::ProtocolServices;
    use crate::protocol::handlers::test_support;
    use crate::queue::JobSubmission;

    fn call(
        handler: fn(&mut CommandContext<'_>, &Params) -> Result<Outcome, CommandError>,
        params: &Params,
    ) -> Result<Outcome, CommandError> {
        let services = test_support::services();
        let mut state = test_support::state(RoleMask::empty());
        let identity = state.identity.clone();
        let mut ctx = CommandContext::new(&services, identity, &mut state, 1);
        handler(&mut ctx, params)
    }

    #[test]
    fn version_reports_the_package() {
        let outcome = call(version, &Params::default()).expect("version");
        let Outcome::Reply(Response::Line(reply)) = outcome else {
            panic!("expected one line");
        };
        assert!(reply.to_string().starts_with("OK:server_version="));
    }

    #[test]
    fn deprecated_commands_acknowledge() {
        assert_eq!(
            call(obsolete_acknowledged, &Params::default()).expect("ack"),
            Outcome::ok("WARNING:Obsolete command;")
        );
    }

    #[test]
    fn jrto_is_refused() {
        let error = call(obsolete_refused, &Params::default()).expect_err("obsolete");
        assert_eq!(
            error.to_reply().to_string(),
            "ERR:eObsoleteCommand:Not implemented"
        );
    }

    fn stat_lines(services: &ProtocolServices, queue: Option<&str>) -> Vec<String> {
        let mut state = test_support::state(RoleMask::QUEUE);
        state.identity.queue = queue.map(str::to_owned);
        let identity = state.identity.clone();
        let mut ctx = CommandContext::new(services, identity, &mut state, 1);
        match statistics(&mut ctx, &Params::default()).expect("stat") {
            Outcome::Reply(Response::Listing(lines)) => lines,
            other => panic!("expected a listing, got {other:?}"),
        }
    }

    #[test]
    fn stat_adds_the_bound_queue() {
        let services = test_support::services();
        let submission = JobSubmission {
            input: "work".to_owned(),
            ..JobSubmission::default()
        };
        services
            .queues
            .submit("batch", vec![submission.clone(), submission])
            .expect("submit");
        services
            .queues
            .touch_client("batch", test_support::identity(RoleMask::QUEUE).record())
            .expect("touch");

        let unbound = stat_lines(&services, None);
        let bound = stat_lines(&services, Some("batch"));

        assert!(!unbound.iter().any(|line| line.starts_with("queue=")));
        assert_eq!(bound.len(), unbound.len() + 3);
        let extra = bound.get(unbound.len()..).unwrap_or_default();
        assert!(
            extra.first().is_some_and(|line| {
                line.starts_with("queue=batch&Pending=2&Running=0")
            }),
            "{extra:?}"
        );
        assert_eq!(extra.get(1).map(String::as_str), Some("queue=batch&clients=1"));
        assert!(
            extra.get(2).is_some_and(|line| line.starts_with("client=node1&session=s1")),
            "{extra:?}"
        );
    }

    #[test]
    fn unknown_stat_options_are_invalid() {
        let mut params = Params::default();
        params.insert("option", "bogus");
        let error = call(statistics, &params).expect_err("bad option");
        assert_eq!(error.code(), ErrorCode::InvalidParameter);
    }

    #[test]
    fn setqueue_recomputes_roles() {
        let services = test_support::services();
        let mut state = test_support::state(RoleMask::empty());
        let identity = state.identity.clone();
        let mut params = Params::default();
        params.insert("qname", "noname");
        let mut ctx = CommandContext::new(&services, identity, &mut state, 1);
        set_queue(&mut ctx, &params).expect("unbind");
        assert_eq!(state.identity.queue, None);
        assert!(!state.identity.capabilities.contains(RoleMask::QUEUE));

        let identity = state.identity.clone();
        params.insert("qname", "batch");
        let mut ctx = CommandContext::new(&services, identity, &mut state, 2);
        set_queue(&mut ctx, &params).expect("bind");
        assert_eq!(state.identity.queue.as_deref(), Some("batch"));
        assert!(state.identity.capabilities.contains(RoleMask::SUBMITTER));
    }
}
