//! Runtime for `nsadmin`, the NetSchedule administrative client.
//!
//! The runtime parses the command line, resolves which kind of server the
//! verb is addressed to, opens a protocol session and prints the reply. It
//! can be driven from the binary or from tests with substituted
//! configuration loading and IO streams.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;

mod cli;
mod command;
mod config;
mod errors;
mod output;
mod resolver;
mod transport;

pub use cli::OutputFormat;
pub use resolver::{ResolveError, Selection, Target, resolve};

use cli::Cli;
use command::Plan;
use config::{ConfigArgumentSplit, split_config_arguments};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;
use transport::{LineChannel, connect};

/// Bundles the IO streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

struct CliRunner<'a, 'io, W: Write, E: Write, L: ConfigLoader> {
    io: &'a mut IoStreams<'io, W, E>,
    loader: &'a L,
}

impl<W, E, L> CliRunner<'_, '_, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);

        let cli = match Cli::try_parse_from(prepare_cli_arguments(&args, &split)) {
            Ok(cli) => cli,
            Err(error) if !error.use_stderr() => {
                let _ = write!(self.io.stdout, "{}", error.render());
                return ExitCode::SUCCESS;
            }
            Err(error) => return self.fail(&AppError::CliUsage(error)),
        };

        match self.execute(&cli, &split) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => self.fail(&error),
        }
    }

    fn execute(&mut self, cli: &Cli, split: &ConfigArgumentSplit) -> Result<(), AppError> {
        let plan = Plan::from_cli(cli)?;
        let config = self.loader.load(&split.config_arguments)?;
        let endpoint = config::server_endpoint(&config, cli.server.as_deref())?;

        let mut channel = LineChannel::new(connect(&endpoint)?);
        channel.handshake(&cli.client_name, plan.queue.as_deref())?;
        let payload = plan.execute(&mut channel)?;
        output::render(&payload, cli.output, self.io.stdout)
    }

    fn fail(&mut self, error: &AppError) -> ExitCode {
        let _ = writeln!(self.io.stderr, "{error}");
        error.exit_code()
    }
}

fn prepare_cli_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    let program = args.first().cloned().into_iter();
    let command = args.iter().skip(split.command_start).cloned();
    program.chain(command).collect()
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

/// Runs the CLI with a custom configuration loader.
pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    io: &mut IoStreams<'_, W, E>,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner { io, loader }.run(args)
}

#[cfg(test)]
mod tests;
