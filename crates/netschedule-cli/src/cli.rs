//! Command-line interface definition for `nsadmin`.
//!
//! The module is shared between the runtime parser and the build script that
//! renders the manual page, so it depends on nothing but `clap` and the
//! configuration crate.

use clap::{Args, Parser, Subcommand, ValueEnum};
use netschedule_config::DEFAULT_ADMIN_CLIENT;

/// How replies are written to standard output.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Reply payloads exactly as the server sent them, one per line.
    #[default]
    Raw,
    /// Replies decoded into JSON objects.
    Json,
}

/// Administrative client for NetSchedule, NetCache and worker-node servers.
#[derive(Parser, Debug)]
#[command(name = "nsadmin", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Address the command at a NetCache server.
    #[arg(long, global = true)]
    pub(crate) netcache: bool,
    /// Address the command at a NetSchedule server.
    #[arg(long, global = true)]
    pub(crate) netschedule: bool,
    /// Address the command at a worker node.
    #[arg(long, global = true)]
    pub(crate) workernode: bool,
    /// Queue the session is bound to.
    #[arg(long, global = true, conflicts_with = "queue_class")]
    pub(crate) queue: Option<String>,
    /// Queue class whose queues `serverinfo` describes.
    #[arg(long, global = true)]
    pub(crate) queue_class: Option<String>,
    /// Server address as `host:port`, `tcp://host:port` or `unix:///path`.
    #[arg(long, global = true, value_name = "ADDRESS")]
    pub(crate) server: Option<String>,
    /// Client name sent in the handshake.
    #[arg(long, global = true, default_value = DEFAULT_ADMIN_CLIENT)]
    pub(crate) client_name: String,
    /// Controls how replies are printed.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Raw)]
    pub(crate) output: OutputFormat,
    /// Administrative action to perform.
    #[command(subcommand)]
    pub(crate) verb: Verb,
}

/// Administrative actions.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verb {
    /// Prints server version information, or queue details with a queue
    /// selector.
    Serverinfo,
    /// Prints server statistics.
    Stats,
    /// Prints server health.
    Health,
    /// Prints the effective server configuration.
    Getconf,
    /// Asks the server to reload its configuration.
    Reconf,
    /// Stops accepting new submitters and shuts down once open batches end.
    Drain,
    /// Shuts the server down.
    Shutdown(ShutdownArgs),
    /// Sends one raw protocol command and prints the reply.
    Exec {
        /// Command words, joined with spaces.
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// How urgently the server should stop.
#[derive(Args, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[group(multiple = false)]
pub(crate) struct ShutdownArgs {
    /// Skip the grace period for open connections.
    #[arg(long)]
    pub(crate) now: bool,
    /// Stop at once without any cleanup.
    #[arg(long)]
    pub(crate) die: bool,
    /// Wait for open batch submissions first.
    #[arg(long)]
    pub(crate) drain: bool,
}

impl Verb {
    /// Name used in messages, matching the subcommand spelling.
    #[allow(
        dead_code,
        reason = "used by lib.rs but not by build.rs which #[path]-includes cli.rs"
    )]
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Serverinfo => "serverinfo",
            Self::Stats => "stats",
            Self::Health => "health",
            Self::Getconf => "getconf",
            Self::Reconf => "reconf",
            Self::Drain => "drain",
            Self::Shutdown(_) => "shutdown",
            Self::Exec { .. } => "exec",
        }
    }
}
