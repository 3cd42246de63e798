//! Error types for the `nsadmin` runtime and their exit codes.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use netschedule_config::SocketParseError;
use netschedule_types::ReplyParseError;
use thiserror::Error;

use crate::resolver::ResolveError;

/// Exit code for usage and target-selection errors.
pub(crate) const EXIT_USAGE: u8 = 2;
/// Exit code when the server cannot be reached.
pub(crate) const EXIT_CONNECT: u8 = 3;
/// Exit code when the server answered `ERR:`.
pub(crate) const EXIT_SERVER_ERROR: u8 = 4;
/// Exit code for replies that are not protocol lines.
pub(crate) const EXIT_MALFORMED_REPLY: u8 = 6;
/// Exit code for failures inside the CLI itself.
pub(crate) const EXIT_INTERNAL: u8 = 10;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Target(#[from] ResolveError),
    #[error("--queue-class only applies to serverinfo")]
    QueueClassMisuse,
    #[error("invalid server address '{address}': {source}")]
    ServerAddress {
        address: String,
        source: SocketParseError,
    },
    #[error("failed to resolve server address {endpoint}: {source}")]
    Resolve { endpoint: String, source: io::Error },
    #[error("failed to connect to server at {endpoint}: {source}")]
    Connect { endpoint: String, source: io::Error },
    #[cfg(not(unix))]
    #[error("platform does not support Unix sockets: {0}")]
    UnsupportedUnixTransport(String),
    #[error("failed to send request to server: {0}")]
    SendRequest(io::Error),
    #[error("failed to read reply from server: {0}")]
    ReadReply(io::Error),
    #[error("server closed the connection before replying")]
    ConnectionClosed,
    #[error(transparent)]
    MalformedReply(#[from] ReplyParseError),
    /// Carries the server's `ERR:` line verbatim.
    #[error("{0}")]
    Server(String),
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
    #[error("failed to encode JSON output: {0}")]
    EncodeJson(serde_json::Error),
}

impl AppError {
    /// Process exit code reported for the error.
    pub(crate) fn exit_code(&self) -> ExitCode {
        let code = match self {
            Self::CliUsage(_)
            | Self::Target(_)
            | Self::QueueClassMisuse
            | Self::ServerAddress { .. } => EXIT_USAGE,
            Self::Resolve { .. } | Self::Connect { .. } => EXIT_CONNECT,
            #[cfg(not(unix))]
            Self::UnsupportedUnixTransport(_) => EXIT_CONNECT,
            Self::Server(_) => EXIT_SERVER_ERROR,
            Self::MalformedReply(_)
            | Self::ConnectionClosed
            | Self::SendRequest(_)
            | Self::ReadReply(_) => EXIT_MALFORMED_REPLY,
            Self::LoadConfiguration(_) | Self::WriteOutput(_) | Self::EncodeJson(_) => {
                EXIT_INTERNAL
            }
        };
        ExitCode::from(code)
    }
}
