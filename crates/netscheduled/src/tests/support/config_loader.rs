//! Configuration loaders for scenarios covering success and failure paths.

use std::sync::Arc;

use camino::Utf8Path;
use ortho_config::OrthoError;
use tempfile::TempDir;

use netschedule_config::{Config, SocketEndpoint};

use crate::bootstrap::{ConfigLoader, StaticConfigLoader};

/// Loopback TCP configuration on an ephemeral port with one static queue.
#[must_use]
pub fn test_config() -> Config {
    Config {
        listen: SocketEndpoint::tcp("127.0.0.1", 0),
        advertised_host: Some("nshost".to_owned()),
        admin_hosts: vec!["localhost".to_owned()],
        queues: vec!["batch".to_owned()],
        idle_timeout_secs: 5,
        ..Config::default()
    }
}

/// Loader yielding [`test_config`].
#[must_use]
pub fn test_loader() -> Arc<dyn ConfigLoader> {
    Arc::new(StaticConfigLoader::new(test_config()))
}

/// Loader listening on a Unix socket inside `dir`.
#[must_use]
pub fn unix_loader(dir: &TempDir) -> Arc<dyn ConfigLoader> {
    let path = Utf8Path::from_path(dir.path())
        .expect("temporary directory should be UTF-8")
        .join("sockets")
        .join("netscheduled.sock");
    Arc::new(StaticConfigLoader::new(Config {
        listen: SocketEndpoint::unix(path),
        ..test_config()
    }))
}

/// Loader that always reports a validation failure.
#[must_use]
pub fn failing_loader() -> Arc<dyn ConfigLoader> {
    Arc::new(StaticConfigLoader::failing(Arc::new(
        OrthoError::Validation {
            key: "listen".to_owned(),
            message: "unsupported scheme 'invalid'".to_owned(),
        },
    )))
}
