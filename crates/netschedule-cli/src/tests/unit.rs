//! Unit tests for the runner's exit codes and stream handling.

use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

use netschedule_config::Config;
use ortho_config::OrthoError;
use rstest::rstest;

use super::support::run_cli;
use crate::{AppError, ConfigLoader, IoStreams, run_with_loader};

struct FailingLoader;

impl ConfigLoader for FailingLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Err(AppError::LoadConfiguration(Arc::new(OrthoError::Validation {
            key: "listen".to_owned(),
            message: "unsupported socket scheme 'udp'".to_owned(),
        })))
    }
}

fn args(words: &[&str]) -> Vec<String> {
    words.iter().map(|word| (*word).to_owned()).collect()
}

#[test]
fn help_goes_to_stdout_and_succeeds() {
    let (exit, stdout, stderr) = run_cli(Config::default(), &args(&["--help"]));
    assert_eq!(exit, ExitCode::SUCCESS);
    assert!(stdout.contains("Usage"), "stdout was {stdout:?}");
    assert!(stderr.is_empty());
}

#[rstest]
#[case::unknown_verb(&["frobnicate"])]
#[case::missing_verb(&[])]
#[case::clashing_modes(&["shutdown", "--now", "--die"])]
#[case::queue_and_class(&["--queue", "a", "--queue-class", "b", "serverinfo"])]
fn parse_failures_are_usage_errors(#[case] words: &[&str]) {
    let (exit, _, stderr) = run_cli(Config::default(), &args(words));
    assert_eq!(exit, ExitCode::from(2));
    assert!(!stderr.is_empty());
}

#[test]
fn selection_is_checked_before_configuration_loads() {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let arguments = ["nsadmin", "drain", "--workernode"].map(OsString::from);
    let exit = {
        let mut io = IoStreams::new(&mut stdout, &mut stderr);
        run_with_loader(arguments, &mut io, &FailingLoader)
    };
    assert_eq!(exit, ExitCode::from(2));
    let stderr = String::from_utf8(stderr).expect("utf8");
    assert!(stderr.contains("--workernode"), "stderr was {stderr:?}");
}

#[test]
fn configuration_failures_are_internal_errors() {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let arguments = ["nsadmin", "drain"].map(OsString::from);
    let exit = {
        let mut io = IoStreams::new(&mut stdout, &mut stderr);
        run_with_loader(arguments, &mut io, &FailingLoader)
    };
    assert_eq!(exit, ExitCode::from(10));
    let stderr = String::from_utf8(stderr).expect("utf8");
    assert!(stderr.starts_with("failed to load configuration"), "{stderr}");
}

#[test]
fn malformed_server_address_is_a_usage_error() {
    let (exit, _, stderr) = run_cli(Config::default(), &args(&["--server", "nshost", "drain"]));
    assert_eq!(exit, ExitCode::from(2));
    assert!(stderr.contains("invalid server address 'nshost'"), "{stderr}");
}
