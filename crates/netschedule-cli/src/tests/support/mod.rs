//! Test support for `nsadmin` behavioural coverage.
//!
//! Supplies a fixed configuration loader, a scripted fake server and a world
//! that runs the CLI in-process while capturing its output.

mod fake_server;

use std::collections::HashMap;
use std::ffi::OsString;
use std::process::ExitCode;

use anyhow::{Context, Result, ensure};
use netschedule_config::Config;

use crate::{AppError, ConfigLoader, IoStreams, run_with_loader};

pub(super) use fake_server::FakeServer;

/// A config loader that returns a fixed configuration.
pub(super) struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub(super) fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// Runs `args` (without the program name) against `config`, returning the
/// exit code and captured streams.
pub(super) fn run_cli(config: Config, args: &[String]) -> (ExitCode, String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let loader = StaticConfigLoader::new(config);
    let arguments = std::iter::once(OsString::from("nsadmin"))
        .chain(args.iter().map(OsString::from))
        .collect::<Vec<_>>();
    let exit = {
        let mut io = IoStreams::new(&mut stdout, &mut stderr);
        run_with_loader(arguments, &mut io, &loader)
    };
    (
        exit,
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    )
}

/// Scenario state: the reply script, the fake server and the CLI outcome.
#[derive(Default)]
pub(super) struct TestWorld {
    pub script: HashMap<String, Vec<String>>,
    pub server: Option<FakeServer>,
    pub exit_code: Option<ExitCode>,
    pub stdout: String,
    pub stderr: String,
    received: Option<Vec<String>>,
}

impl TestWorld {
    pub fn script_reply(&mut self, request: &str, replies: &[&str]) {
        self.script.insert(
            request.to_owned(),
            replies.iter().map(|reply| (*reply).to_owned()).collect(),
        );
    }

    /// Starts the fake server and runs `nsadmin` against it with `args`.
    pub fn run(&mut self, args: &str) -> Result<()> {
        let server = FakeServer::spawn(self.script.clone())?;
        let mut arguments = vec!["--server".to_owned(), format!("127.0.0.1:{}", server.port())];
        arguments.extend(args.split_whitespace().map(str::to_owned));
        let (exit, stdout, stderr) = run_cli(Config::default(), &arguments);
        self.exit_code = Some(exit);
        self.stdout = stdout;
        self.stderr = stderr;
        self.server = Some(server);
        Ok(())
    }

    /// Lines the fake server received, waiting for the session to end.
    pub fn received(&mut self) -> Result<Vec<String>> {
        if let Some(lines) = &self.received {
            return Ok(lines.clone());
        }
        let lines = self
            .server
            .as_mut()
            .context("no fake server was started")?
            .received()?;
        self.received = Some(lines.clone());
        Ok(lines)
    }

    pub fn assert_exit(&self, code: u8) -> Result<()> {
        let exit = self.exit_code.context("the CLI has not run")?;
        ensure!(
            exit == ExitCode::from(code),
            "expected exit code {code}, got {exit:?}; stderr: {}",
            self.stderr
        );
        Ok(())
    }
}
