//! Configuration loading helpers for `nsadmin`.
//!
//! Leading flags understood by `ortho_config` are split off before `clap`
//! sees the command line, so the shared [`Config`] can supply the default
//! server address while `clap` handles the verb and its selectors.

use std::ffi::{OsStr, OsString};

use netschedule_config::{Config, DEFAULT_CLIENT_HOST, SocketEndpoint};
use ortho_config::OrthoConfig;

use crate::AppError;

/// Flags forwarded to the configuration loader.
///
/// Must stay in sync with the flags `netschedule-config` accepts that matter
/// to the client.
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &["--config-path", "--listen"];

pub(crate) trait ConfigLoader {
    /// Loads configuration for the CLI.
    ///
    /// Configuration flags must precede the verb; later occurrences are left
    /// to `clap`, which rejects them.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

fn classify_flag(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Skip;
    }
    let (flag, has_inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (&*text, false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !has_inline_value,
        }
    } else {
        FlagAction::Skip
    }
}

pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_start: usize,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some(program) = args.first() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_start: 0,
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut command_start = 1usize;
    let mut pending_value = false;

    for argument in args.iter().skip(1) {
        if pending_value {
            config_arguments.push(argument.clone());
            pending_value = false;
            command_start += 1;
            continue;
        }
        match classify_flag(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(argument.clone());
                pending_value = needs_value;
                command_start += 1;
            }
            FlagAction::Skip => break,
        }
    }

    ConfigArgumentSplit {
        config_arguments,
        command_start,
    }
}

/// Endpoint to dial: the `--server` override, else the configured listen
/// address with wildcard hosts replaced by loopback.
pub(crate) fn server_endpoint(
    config: &Config,
    server: Option<&str>,
) -> Result<SocketEndpoint, AppError> {
    if let Some(address) = server {
        return address
            .parse()
            .map_err(|source| AppError::ServerAddress {
                address: address.to_owned(),
                source,
            });
    }
    Ok(match config.listen() {
        SocketEndpoint::Tcp { host, port } if host == "0.0.0.0" || host == "::" => {
            SocketEndpoint::tcp(DEFAULT_CLIENT_HOST, *port)
        }
        other => other.clone(),
    })
}
