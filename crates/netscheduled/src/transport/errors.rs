//! Listener failures.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while binding the listen socket or running the accept loop.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The endpoint could not be bound.
    #[error("cannot listen on {endpoint}: {source}")]
    Bind {
        /// Endpoint as configured.
        endpoint: String,
        /// Underlying bind or resolution failure.
        #[source]
        source: io::Error,
    },
    /// The socket refused non-blocking mode, so the stop flag could not be
    /// polled between accepts.
    #[error("cannot poll {endpoint} for connections: {source}")]
    NonBlocking {
        /// Endpoint as configured.
        endpoint: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Unix socket endpoints on a platform without them.
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported for endpoint {endpoint}")]
    UnsupportedUnix {
        /// Endpoint as configured.
        endpoint: String,
    },
    /// Another server answers on the socket path.
    #[cfg(unix)]
    #[error("another server is already listening on {path}")]
    UnixInUse {
        /// Socket path.
        path: Utf8PathBuf,
    },
    /// The socket path is taken by something other than a socket.
    #[cfg(unix)]
    #[error("{path} exists and is not a socket")]
    NotASocket {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// A leftover socket file could not be inspected or removed.
    #[cfg(unix)]
    #[error("cannot reclaim stale socket {path}: {source}")]
    StaleSocket {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The accept loop thread panicked.
    #[error("accept loop panicked")]
    ThreadPanic,
}
