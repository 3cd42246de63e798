//! Error code taxonomy carried by `ERR:` reply lines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories reported to clients as `ERR:<code>:<message>`.
///
/// The wire spelling is the variant name prefixed with `e`, for example
/// `eProtocolSyntaxError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed line, unknown command or field, missing required field.
    ProtocolSyntaxError,
    /// The handshake line could not be parsed.
    AuthenticationError,
    /// The client program or version is not admitted by the queue.
    InvalidClientOrVersion,
    /// The client lacks the role required by the command.
    AccessDenied,
    /// A parameter was well formed but semantically invalid.
    InvalidParameter,
    /// A read confirmation carried a stale or foreign auth token.
    InvalidAuthToken,
    /// The named queue does not exist.
    UnknownQueue,
    /// The referenced job does not exist.
    JobNotFound,
    /// The job is not in a state that permits the operation.
    InvalidJobStatus,
    /// The server refuses new submissions (drain or shutdown).
    SubmitsDisabled,
    /// The server is shutting down.
    ShuttingDown,
    /// The command is recognised but no longer implemented.
    ObsoleteCommand,
    /// Any other server-side failure, including storage faults.
    InternalError,
    /// Reading from or writing to the client socket failed.
    SocketIoError,
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::ProtocolSyntaxError,
        Self::AuthenticationError,
        Self::InvalidClientOrVersion,
        Self::AccessDenied,
        Self::InvalidParameter,
        Self::InvalidAuthToken,
        Self::UnknownQueue,
        Self::JobNotFound,
        Self::InvalidJobStatus,
        Self::SubmitsDisabled,
        Self::ShuttingDown,
        Self::ObsoleteCommand,
        Self::InternalError,
        Self::SocketIoError,
    ];

    /// Returns the wire spelling of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProtocolSyntaxError => "eProtocolSyntaxError",
            Self::AuthenticationError => "eAuthenticationError",
            Self::InvalidClientOrVersion => "eInvalidClientOrVersion",
            Self::AccessDenied => "eAccessDenied",
            Self::InvalidParameter => "eInvalidParameter",
            Self::InvalidAuthToken => "eInvalidAuthToken",
            Self::UnknownQueue => "eUnknownQueue",
            Self::JobNotFound => "eJobNotFound",
            Self::InvalidJobStatus => "eInvalidJobStatus",
            Self::SubmitsDisabled => "eSubmitsDisabled",
            Self::ShuttingDown => "eShuttingDown",
            Self::ObsoleteCommand => "eObsoleteCommand",
            Self::InternalError => "eInternalError",
            Self::SocketIoError => "eSocketIOError",
        }
    }

    /// Returns `true` when a failure of this kind ends the client connection.
    ///
    /// All other codes abort only the command in flight; the connection keeps
    /// reading the next line.
    #[must_use]
    pub const fn closes_connection(self) -> bool {
        matches!(
            self,
            Self::AuthenticationError | Self::SocketIoError | Self::ShuttingDown
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error returned when an `ERR:` code is not part of the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown error code '{0}'")]
pub struct UnknownErrorCode(pub String);

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(input))
            .ok_or_else(|| UnknownErrorCode(input.to_owned()))
    }
}
