//! `nsadmin` entrypoint.
//!
//! Delegates to [`netschedule_cli::run`], which resolves the target server,
//! sends the protocol command and prints the reply.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    netschedule_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
