//! Command resolution, authorisation and invocation.

use netschedule_types::ErrorCode;

use super::arguments::{Params, bind, tokenize};
use super::handlers::{CommandContext, referenced_queue};
use super::identity::{AccessPolicy, ClientIdentity};
use super::rollback::Outcome;
use super::session::{ProtocolServices, SessionState};
use super::table::{CommandDescriptor, CommandTable};
use super::CommandError;
use crate::queue::QueueService;

/// A line resolved against a command table.
#[derive(Debug)]
pub struct ParsedCommand {
    /// Matched command.
    pub descriptor: CommandDescriptor,
    /// Bound arguments.
    pub params: Params,
}

/// Resolves the command named by the first token of `line` and binds the
/// remaining tokens to its arguments.
///
/// # Errors
///
/// Returns `eProtocolSyntaxError` for unknown commands and argument errors,
/// naming the offending column.
pub fn parse(table: &CommandTable, line: &str) -> Result<ParsedCommand, CommandError> {
    let tokens = tokenize(line);
    let Some(first) = tokens.first() else {
        return Err(CommandError::syntax_at(line, 1, "empty command"));
    };
    let name = line
        .get(first.offset..first.offset + token_len(first))
        .unwrap_or_default();
    let descriptor = table
        .get(name)
        .copied()
        .ok_or_else(|| {
            CommandError::syntax_at(line, first.column(line), format!("unknown command '{name}'"))
        })?;
    let params = bind(descriptor.args, line, tokens.get(1..).unwrap_or_default())?;
    Ok(ParsedCommand { descriptor, params })
}

fn token_len(token: &super::arguments::Token<'_>) -> usize {
    token.value_offset - token.offset + token.raw_value.len()
}

/// Identity a command runs as.
///
/// Commands addressing a job by a key that names another queue act as that
/// queue's client for this command only.
///
/// # Errors
///
/// Returns `eUnknownQueue` when the key names a queue that does not exist.
pub fn effective_identity(
    descriptor: &CommandDescriptor,
    params: &Params,
    bound: &ClientIdentity,
    policy: &AccessPolicy,
    queues: &dyn QueueService,
) -> Result<ClientIdentity, CommandError> {
    if !descriptor.needs_queue {
        return Ok(bound.clone());
    }
    match referenced_queue(params, "job_key") {
        Some(queue) if bound.queue.as_deref() != Some(queue.as_str()) => {
            bound.bind(Some(&queue), policy, queues)
        }
        _ => Ok(bound.clone()),
    }
}

/// Checks queue binding, role and client program for a command.
///
/// # Errors
///
/// Returns `eUnknownQueue`, `eAccessDenied` or `eInvalidClientOrVersion`.
pub fn authorize(
    descriptor: &CommandDescriptor,
    identity: &ClientIdentity,
) -> Result<(), CommandError> {
    if descriptor.needs_queue && identity.queue.is_none() {
        return Err(CommandError::unknown_queue(format!(
            "{} requires a queue",
            descriptor.name
        )));
    }
    if !identity.capabilities.permits(descriptor.required_role) {
        return Err(CommandError::access_denied(format!(
            "{} requires one of {:?}",
            descriptor.name,
            descriptor.required_role.role_names()
        )));
    }
    if !descriptor.skips_version_check && !identity.program_admitted {
        return Err(CommandError::new(
            ErrorCode::InvalidClientOrVersion,
            format!(
                "client program '{}' is not admitted",
                identity.program.as_deref().unwrap_or_default()
            ),
        ));
    }
    Ok(())
}

/// Authorises and runs a parsed command.
///
/// # Errors
///
/// Returns the authorisation or handler failure.
pub fn run(
    descriptor: CommandDescriptor,
    params: &Params,
    services: &ProtocolServices,
    state: &mut SessionState,
    request_id: u64,
) -> Result<Outcome, CommandError> {
    let policy = services.server.policy();
    let identity = effective_identity(
        &descriptor,
        params,
        &state.identity,
        &policy,
        services.queues.as_ref(),
    )?;
    authorize(&descriptor, &identity)?;

    let mut ctx = CommandContext::new(services, identity, state, request_id);
    (descriptor.handler)(&mut ctx, params)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use mockall::mock;
    use rstest::rstest;

    use super::*;
    use crate::protocol::RoleMask;
    use crate::protocol::handlers::test_support;
    use crate::protocol::table::COMMANDS;
    use crate::queue::{
        AffinityUpdate, ClientRecord, JobResult, JobSnapshot, JobSubmission, LeasedJob,
        PullRequest, QueueError, QueueInfo, ReadLease, ReadOutcome,
    };

    mock! {
        Queues {}

        impl QueueService for Queues {
            fn queue_names(&self) -> Vec<String>;
            fn has_queue(&self, name: &str) -> bool;
            fn queue_info(&self, name: &str) -> Result<QueueInfo, QueueError>;
            fn create_queue(&self, name: &str, class: &str, description: &str) -> Result<(), QueueError>;
            fn delete_queue(&self, name: &str) -> Result<(), QueueError>;
            fn drop_jobs(&self, queue: &str) -> Result<usize, QueueError>;
            fn submit(&self, queue: &str, jobs: Vec<JobSubmission>) -> Result<u64, QueueError>;
            fn erase(&self, queue: &str, ids: &[u64]) -> Result<(), QueueError>;
            fn job(&self, queue: &str, id: u64) -> Result<JobSnapshot, QueueError>;
            fn jobs(&self, queue: &str) -> Result<Vec<JobSnapshot>, QueueError>;
            fn cancel(&self, queue: &str, id: u64) -> Result<(), QueueError>;
            fn cancel_all(&self, queue: &str) -> Result<usize, QueueError>;
            fn set_progress(&self, queue: &str, id: u64, message: &str) -> Result<(), QueueError>;
            fn pull(
                &self,
                queue: &str,
                request: &PullRequest,
                wait: Duration,
                cancel: &AtomicBool,
            ) -> Result<Option<LeasedJob>, QueueError>;
            fn return_job(&self, queue: &str, id: u64, count_attempt: bool) -> Result<(), QueueError>;
            fn complete(&self, queue: &str, id: u64, result: JobResult) -> Result<(), QueueError>;
            fn fail(&self, queue: &str, id: u64, message: &str, result: JobResult) -> Result<(), QueueError>;
            fn extend_lease(&self, queue: &str, id: u64, timeout: Duration) -> Result<(), QueueError>;
            fn read(
                &self,
                queue: &str,
                wait: Duration,
                cancel: &AtomicBool,
            ) -> Result<Option<ReadLease>, QueueError>;
            fn finish_read(
                &self,
                queue: &str,
                id: u64,
                token: &str,
                outcome: &ReadOutcome,
            ) -> Result<(), QueueError>;
            fn worker_affinities(&self, queue: &str, worker: &str) -> Result<Vec<String>, QueueError>;
            fn update_affinities(
                &self,
                queue: &str,
                worker: &str,
                update: &AffinityUpdate,
            ) -> Result<(), QueueError>;
            fn affinity_counts(&self, queue: &str) -> Result<Vec<(String, usize)>, QueueError>;
            fn clear_worker(&self, queue: &str, worker: &str) -> Result<usize, QueueError>;
            fn touch_client(&self, queue: &str, client: ClientRecord) -> Result<(), QueueError>;
            fn clients(&self, queue: &str) -> Result<Vec<ClientRecord>, QueueError>;
        }
    }

    fn run_line(
        queues: MockQueues,
        roles: RoleMask,
        line: &str,
    ) -> Result<Outcome, CommandError> {
        let services = test_support::services_with(Arc::new(queues));
        let mut state = test_support::state(roles);
        let parsed = parse(&COMMANDS, line)?;
        run(parsed.descriptor, &parsed.params, &services, &mut state, 1)
    }

    #[rstest]
    #[case::submit_as_worker("SUBMIT input=x", RoleMask::QUEUE | RoleMask::WORKER)]
    #[case::get_as_submitter("GET", RoleMask::QUEUE | RoleMask::SUBMITTER)]
    #[case::shutdown_as_queue_client("SHUTDOWN", RoleMask::QUEUE | RoleMask::SUBMITTER)]
    #[case::drop_queue_as_worker("DROPQ", RoleMask::QUEUE | RoleMask::WORKER)]
    fn missing_roles_never_reach_the_queue_service(#[case] line: &str, #[case] roles: RoleMask) {
        let queues = MockQueues::new();
        let error = run_line(queues, roles, line).expect_err("must be denied");
        assert_eq!(error.code(), ErrorCode::AccessDenied);
    }

    #[test]
    fn status_reads_the_bound_queue() {
        let mut queues = MockQueues::new();
        queues
            .expect_job()
            .withf(|queue, id| queue == "batch" && *id == 12)
            .times(1)
            .returning(|_, id| Err(QueueError::JobNotFound { id }));
        let error = run_line(queues, RoleMask::QUEUE, "STATUS 12").expect_err("missing job");
        assert_eq!(error.code(), ErrorCode::JobNotFound);
    }

    #[test]
    fn foreign_job_keys_rebind_for_one_command() {
        let mut queues = MockQueues::new();
        queues
            .expect_has_queue()
            .withf(|name| name == "other")
            .returning(|_| true);
        queues
            .expect_cancel()
            .withf(|queue, id| queue == "other" && *id == 3)
            .times(1)
            .returning(|_, _| Ok(()));
        let outcome = run_line(
            queues,
            RoleMask::QUEUE | RoleMask::SUBMITTER,
            "CANCEL JSID_01_3_nshost_9100_other",
        )
        .expect("cancel");
        assert_eq!(outcome, Outcome::ok(""));
    }

    #[test]
    fn storage_failures_are_fatal() {
        let mut queues = MockQueues::new();
        queues
            .expect_cancel_all()
            .returning(|_| Err(QueueError::storage("disk gone")));
        let error = run_line(queues, RoleMask::QUEUE, "CANCELQ").expect_err("fatal");
        assert!(error.is_fatal());
        assert!(error.closes_connection());
    }

    #[test]
    fn unknown_commands_name_their_column() {
        let error = parse(&COMMANDS, "  FROB").expect_err("unknown");
        assert_eq!(
            error.message(),
            "unknown command 'FROB' at column 3 of '  FROB'"
        );
    }

    #[test]
    fn queue_bound_commands_need_a_queue() {
        let descriptor = COMMANDS.get("STATUS").copied().expect("STATUS");
        let identity = test_support::identity(RoleMask::empty());
        let unbound = ClientIdentity {
            queue: None,
            ..identity
        };
        let error = authorize(&descriptor, &unbound).expect_err("no queue");
        assert_eq!(error.code(), ErrorCode::UnknownQueue);
    }

    #[test]
    fn rejected_programs_may_still_poll_status() {
        let identity = ClientIdentity {
            program_admitted: false,
            ..test_support::identity(RoleMask::QUEUE | RoleMask::WORKER)
        };
        let status = COMMANDS.get("STATUS").copied().expect("STATUS");
        assert!(authorize(&status, &identity).is_ok());
        let get = COMMANDS.get("GET").copied().expect("GET");
        let error = authorize(&get, &identity).expect_err("old program");
        assert_eq!(error.code(), ErrorCode::InvalidClientOrVersion);
    }
}
