//! Configuration layers that cannot be read stop the load instead of being
//! skipped.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use netschedule_config::Config;
use once_cell::sync::Lazy;
use ortho_config::{OrthoConfig, OrthoError};
use rstest::rstest;
use tempfile::TempDir;

const CONFIG_PATH_VAR: &str = "NETSCHEDULE_CONFIG_PATH";

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Runs `body` with the config-path variable pointing at `path`, restoring
/// the previous value afterwards.
fn with_env_config_path<T>(path: &Path, body: impl FnOnce() -> T) -> T {
    let _lock = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let previous = std::env::var_os(CONFIG_PATH_VAR);
    // Edition 2024 marks environment writes unsafe; ENV_LOCK serialises them.
    unsafe { std::env::set_var(CONFIG_PATH_VAR, path) };
    let result = body();
    match previous {
        Some(value) => unsafe { std::env::set_var(CONFIG_PATH_VAR, value) },
        None => unsafe { std::env::remove_var(CONFIG_PATH_VAR) },
    }
    result
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write config file");
    path
}

fn load_with_flags(flags: &[OsString]) -> Result<Config, Arc<OrthoError>> {
    let args = std::iter::once(OsString::from("netscheduled")).chain(flags.iter().cloned());
    Config::load_from_iter(args)
}

fn file_errors(error: &OrthoError) -> Vec<PathBuf> {
    match error {
        OrthoError::Aggregate(aggregate) => aggregate
            .iter()
            .filter_map(|inner| match inner {
                OrthoError::File { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect(),
        OrthoError::File { path, .. } => vec![path.clone()],
        _ => Vec::new(),
    }
}

#[test]
fn every_broken_file_is_reported() {
    let dir = TempDir::new().expect("temp dir");
    let flag_file = write_file(
        &dir,
        "flag.toml",
        r#"listen = { transport = "tcp" host = "127.0.0.1" }"#,
    );
    let env_file = write_file(&dir, "env.toml", r#"max_batch_size = "lots""#);

    let error = with_env_config_path(&env_file, || {
        load_with_flags(&[OsString::from("--config-path"), flag_file.clone().into()])
    })
    .expect_err("both files are broken");

    let reported = file_errors(&error);
    assert!(
        reported.contains(&flag_file) && reported.contains(&env_file),
        "reported files: {reported:?}"
    );
}

#[rstest]
#[case::batch_size_text(r#"max_batch_size = "lots""#)]
#[case::negative_timeout("idle_timeout_secs = -5")]
#[case::unknown_log_format(r#"log_format = "pretty""#)]
#[case::acl_role(r#"queue_acls = [{ queue = "batch", role = "owner", values = [] }]"#)]
#[case::unterminated_table("[listen")]
fn invalid_files_fail_the_load(#[case] contents: &str) {
    let dir = TempDir::new().expect("temp dir");
    let path = write_file(&dir, "netscheduled.toml", contents);
    let result = load_with_flags(&[OsString::from("--config-path"), path.into()]);
    assert!(result.is_err(), "{contents} should not load");
}

#[rstest]
#[case::udp_scheme("udp://nshost:9100")]
#[case::missing_port("tcp://nshost")]
#[case::empty_unix_path("unix://")]
fn invalid_listen_flags_fail_the_load(#[case] listen: &str) {
    let result = load_with_flags(&[OsString::from("--listen"), OsString::from(listen)]);
    assert!(result.is_err(), "{listen} should be rejected");
}
