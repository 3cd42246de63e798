//! Command descriptors and the lookup tables built from them.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

use super::arguments::{ArgKind, ArgumentSpec, Params};
use super::handlers::{CommandContext, admin, info, queue, submitter, worker};
use super::rollback::Outcome;
use super::{CommandError, RoleMask, batch};

/// Command implementation.
pub type Handler = fn(&mut CommandContext<'_>, &Params) -> Result<Outcome, CommandError>;

/// Static description of one command.
#[derive(Clone, Copy)]
pub struct CommandDescriptor {
    /// Upper-case command name.
    pub name: &'static str,
    /// Implementation.
    pub handler: Handler,
    /// Roles any one of which admits the command.
    pub required_role: RoleMask,
    /// Whether the command operates on the bound queue.
    pub needs_queue: bool,
    /// Whether the program/version check is skipped.
    pub skips_version_check: bool,
    /// Whether argument values are kept out of diagnostics.
    pub redact_arguments: bool,
    /// Declared arguments.
    pub args: &'static [ArgumentSpec],
}

impl CommandDescriptor {
    fn new(name: &'static str, required_role: RoleMask, handler: Handler) -> Self {
        Self {
            name,
            handler,
            required_role,
            needs_queue: false,
            skips_version_check: false,
            redact_arguments: false,
            args: &[],
        }
    }

    fn args(mut self, args: &'static [ArgumentSpec]) -> Self {
        self.args = args;
        self
    }

    fn on_queue(mut self) -> Self {
        self.needs_queue = true;
        self
    }

    fn low_latency(mut self) -> Self {
        self.skips_version_check = true;
        self
    }

    fn redacted(mut self) -> Self {
        self.redact_arguments = true;
        self
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("required_role", &self.required_role)
            .field("needs_queue", &self.needs_queue)
            .field("skips_version_check", &self.skips_version_check)
            .field("redact_arguments", &self.redact_arguments)
            .finish_non_exhaustive()
    }
}

/// Descriptors keyed by command name.
pub type CommandTable = HashMap<&'static str, CommandDescriptor>;

/// Batch job line: `input=<escaped>[&aff=<token>][&msk=<mask>]`.
pub const JOB_LINE_SPEC: &[ArgumentSpec] = &[
    ArgumentSpec::required("input", ArgKind::Str),
    ArgumentSpec::optional("aff", ArgKind::Str, ""),
    ArgumentSpec::optional("msk", ArgKind::Int, "0"),
];

const JOB_KEY: &[ArgumentSpec] = &[ArgumentSpec::required("job_key", ArgKind::Id)];
const QUEUE_NAME: &[ArgumentSpec] = &[ArgumentSpec::required("qname", ArgKind::Str)];
const REST: &[ArgumentSpec] = &[ArgumentSpec::ellipsis("params")];
const BATCH_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("size", ArgKind::Int),
    ArgumentSpec::optional("port", ArgKind::Int, "0"),
    ArgumentSpec::optional("timeout", ArgKind::Int, "0"),
];
const BSUB_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::optional("port", ArgKind::Int, "0"),
    ArgumentSpec::optional("timeout", ArgKind::Int, "0"),
];

const SHUTDOWN_ARGS: &[ArgumentSpec] = &[ArgumentSpec::optional("mode", ArgKind::Str, "normal")];
const SETQUEUE_ARGS: &[ArgumentSpec] = &[ArgumentSpec::optional("qname", ArgKind::Str, "")];
const STAT_ARGS: &[ArgumentSpec] = &[ArgumentSpec::optional("option", ArgKind::Str, "")];
const QCRE_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("qname", ArgKind::Str),
    ArgumentSpec::required("qclass", ArgKind::Str),
    ArgumentSpec::optional("description", ArgKind::Str, ""),
];
const MPUT_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("job_key", ArgKind::Id),
    ArgumentSpec::required("progress_msg", ArgKind::Str),
];
const DUMP_ARGS: &[ArgumentSpec] = &[ArgumentSpec::optional("job_key", ArgKind::Id, "")];
const SUBMIT_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("input", ArgKind::Str),
    ArgumentSpec::optional("port", ArgKind::Int, "0"),
    ArgumentSpec::optional("timeout", ArgKind::Int, "0"),
    ArgumentSpec::optional("aff", ArgKind::Str, ""),
    ArgumentSpec::optional("msk", ArgKind::Int, "0"),
    ArgumentSpec::optional("ip", ArgKind::Str, ""),
    ArgumentSpec::optional("sid", ArgKind::Str, ""),
];
const READ_ARGS: &[ArgumentSpec] = &[ArgumentSpec::optional("timeout", ArgKind::Int, "0")];
const TOKEN_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("job_key", ArgKind::Id),
    ArgumentSpec::required("auth_token", ArgKind::Str),
];
const FRED_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("job_key", ArgKind::Id),
    ArgumentSpec::required("auth_token", ArgKind::Str),
    ArgumentSpec::optional("err_msg", ArgKind::Str, ""),
];
const GET_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::optional("aff", ArgKind::Str, ""),
    ArgumentSpec::optional("port", ArgKind::Int, "0"),
];
const GET2_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::optional("aff", ArgKind::Str, ""),
    ArgumentSpec::optional("any_aff", ArgKind::Int, "0"),
    ArgumentSpec::optional("exclusive_new_aff", ArgKind::Int, "0"),
];
const WGET_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("timeout", ArgKind::Int),
    ArgumentSpec::optional("aff", ArgKind::Str, ""),
];
const PUT_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("job_key", ArgKind::Id),
    ArgumentSpec::required("job_return_code", ArgKind::Int),
    ArgumentSpec::optional("output", ArgKind::Str, ""),
];
const FPUT_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("job_key", ArgKind::Id),
    ArgumentSpec::required("err_msg", ArgKind::Str),
    ArgumentSpec::optional("output", ArgKind::Str, ""),
    ArgumentSpec::optional("job_return_code", ArgKind::Int, "0"),
];
const JXCG_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::optchain("job_key", ArgKind::Id),
    ArgumentSpec::optchain("job_return_code", ArgKind::Int),
    ArgumentSpec::optional("output", ArgKind::Str, ""),
];
const JDEX_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("job_key", ArgKind::Id),
    ArgumentSpec::required("timeout", ArgKind::Int),
];
const CHAFF_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::optional("add", ArgKind::Str, ""),
    ArgumentSpec::optional("del", ArgKind::Str, ""),
];
const SETAFF_ARGS: &[ArgumentSpec] = &[ArgumentSpec::optional("aff", ArgKind::Str, "")];

fn build(descriptors: Vec<CommandDescriptor>) -> CommandTable {
    descriptors
        .into_iter()
        .map(|descriptor| (descriptor.name, descriptor))
        .collect()
}

fn batch_start() -> CommandDescriptor {
    CommandDescriptor::new("BTCH", RoleMask::SUBMITTER, batch::begin_batch)
        .args(BATCH_ARGS)
        .on_queue()
}

/// Commands accepted in the command loop.
pub static COMMANDS: Lazy<CommandTable> = Lazy::new(|| {
    use CommandDescriptor as D;
    let admin = RoleMask::ADMIN;
    let any = RoleMask::ANY;
    let on_queue = RoleMask::QUEUE;
    let submitter = RoleMask::SUBMITTER;
    let worker = RoleMask::WORKER;
    build(vec![
        D::new("SHUTDOWN", admin, admin::shutdown).args(SHUTDOWN_ARGS),
        D::new("GETCONF", admin, admin::get_config),
        D::new("RECO", admin, admin::reconfigure),
        D::new("ACNT", admin, admin::active_connections),
        D::new("DROPQ", RoleMask::QUEUE_ADMIN, admin::drop_jobs).on_queue(),
        D::new("QCRE", RoleMask::DYN_CLASS_ADMIN, admin::create_queue).args(QCRE_ARGS),
        D::new("QDEL", RoleMask::DYN_QUEUE_ADMIN, admin::delete_queue).args(QUEUE_NAME),
        D::new("VERSION", any, info::version).low_latency(),
        D::new("QUIT", any, info::quit).low_latency(),
        D::new("QLST", any, info::queue_list),
        D::new("QINF", any, info::queue_info).args(QUEUE_NAME),
        D::new("QINF2", any, info::queue_info_with_counts).args(QUEUE_NAME),
        D::new("SETQUEUE", any, info::set_queue).args(SETQUEUE_ARGS),
        D::new("STAT", any, info::statistics).args(STAT_ARGS).low_latency(),
        D::new("HEALTH", any, info::health).low_latency(),
        D::new("REGC", any, info::obsolete_acknowledged).args(REST),
        D::new("URGC", any, info::obsolete_acknowledged).args(REST),
        D::new("INIT", any, info::obsolete_acknowledged).args(REST),
        D::new("JRTO", any, info::obsolete_refused).args(REST),
        D::new("STATUS", on_queue, queue::status).args(JOB_KEY).on_queue().low_latency(),
        D::new("SST", on_queue, queue::status).args(JOB_KEY).on_queue().low_latency(),
        D::new("WST", on_queue, queue::status).args(JOB_KEY).on_queue().low_latency(),
        D::new("STATUS2", on_queue, queue::status_details)
            .args(JOB_KEY)
            .on_queue()
            .low_latency(),
        D::new("MPUT", on_queue, queue::put_progress).args(MPUT_ARGS).on_queue(),
        D::new("MGET", on_queue, queue::get_progress)
            .args(JOB_KEY)
            .on_queue()
            .low_latency(),
        D::new("DUMP", on_queue, queue::dump).args(DUMP_ARGS).on_queue(),
        D::new("GETP", on_queue, queue::parameters).on_queue(),
        D::new("GETC", on_queue, queue::clients).on_queue(),
        D::new("CLRN", on_queue, queue::clear_node).on_queue(),
        D::new("CANCELQ", on_queue, queue::cancel_all).on_queue(),
        D::new("SUBMIT", submitter, submitter::submit)
            .args(SUBMIT_ARGS)
            .on_queue()
            .redacted(),
        D::new("BSUB", submitter, batch::begin_session)
            .args(BSUB_ARGS)
            .on_queue(),
        batch_start(),
        D::new("CANCEL", submitter, submitter::cancel).args(JOB_KEY).on_queue(),
        D::new("READ", submitter, submitter::read).args(READ_ARGS).on_queue(),
        D::new("CFRM", submitter, submitter::confirm_read).args(TOKEN_ARGS).on_queue(),
        D::new("FRED", submitter, submitter::fail_read).args(FRED_ARGS).on_queue(),
        D::new("RDRB", submitter, submitter::rollback_read).args(TOKEN_ARGS).on_queue(),
        D::new("GET", worker, worker::get).args(GET_ARGS).on_queue(),
        D::new("GET2", worker, worker::get2).args(GET2_ARGS).on_queue(),
        D::new("WGET", worker, worker::wait_get).args(WGET_ARGS).on_queue(),
        D::new("PUT", worker, worker::put).args(PUT_ARGS).on_queue(),
        D::new("PUT2", worker, worker::put).args(PUT_ARGS).on_queue(),
        D::new("RETURN", worker, worker::return_job).args(JOB_KEY).on_queue(),
        D::new("RETURN2", worker, worker::return_job).args(JOB_KEY).on_queue(),
        D::new("FPUT", worker, worker::fail).args(FPUT_ARGS).on_queue(),
        D::new("FPUT2", worker, worker::fail).args(FPUT_ARGS).on_queue(),
        D::new("JXCG", worker, worker::exchange).args(JXCG_ARGS).on_queue(),
        D::new("JDEX", worker, worker::extend_lease).args(JDEX_ARGS).on_queue(),
        D::new("CHAFF", worker, worker::change_affinity).args(CHAFF_ARGS).on_queue(),
        D::new("SETAFF", worker, worker::set_affinity).args(SETAFF_ARGS).on_queue(),
        D::new("CWGET", worker, worker::cancel_wait).on_queue(),
        D::new("AFLS", worker, worker::affinity_list).on_queue(),
    ])
});

/// Commands accepted between batches of an open batch session.
pub static BATCH_HEADER: Lazy<CommandTable> = Lazy::new(|| {
    build(vec![
        batch_start(),
        CommandDescriptor::new("ENDS", RoleMask::SUBMITTER, batch::end_session).on_queue(),
    ])
});

/// Commands accepted once every job line of a batch was received.
pub static BATCH_TRAILER: Lazy<CommandTable> = Lazy::new(|| {
    build(vec![
        CommandDescriptor::new("ENDB", RoleMask::SUBMITTER, batch::end_batch).on_queue(),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::status("STATUS", true)]
    #[case::status2("STATUS2", true)]
    #[case::mget("MGET", true)]
    #[case::version("VERSION", true)]
    #[case::quit("QUIT", true)]
    #[case::stat("STAT", true)]
    #[case::health("HEALTH", true)]
    #[case::submit("SUBMIT", false)]
    #[case::get("GET", false)]
    fn low_latency_commands_skip_the_version_check(#[case] name: &str, #[case] skips: bool) {
        let descriptor = COMMANDS.get(name).expect("command present");
        assert_eq!(descriptor.skips_version_check, skips);
    }

    #[test]
    fn only_submit_redacts_its_arguments() {
        let redacted: Vec<_> = COMMANDS
            .values()
            .filter(|descriptor| descriptor.redact_arguments)
            .map(|descriptor| descriptor.name)
            .collect();
        assert_eq!(redacted, vec!["SUBMIT"]);
    }

    #[test]
    fn batch_tables_are_disjoint_from_each_other() {
        assert!(BATCH_HEADER.contains_key("BTCH"));
        assert!(BATCH_HEADER.contains_key("ENDS"));
        assert!(!BATCH_HEADER.contains_key("ENDB"));
        assert_eq!(BATCH_TRAILER.keys().copied().collect::<Vec<_>>(), vec!["ENDB"]);
    }

    #[test]
    fn ellipsis_is_always_the_last_argument() {
        for descriptor in COMMANDS.values() {
            let position = descriptor
                .args
                .iter()
                .position(|spec| spec.kind == ArgKind::Ellipsis);
            if let Some(index) = position {
                assert_eq!(index + 1, descriptor.args.len(), "{}", descriptor.name);
            }
        }
    }
}
