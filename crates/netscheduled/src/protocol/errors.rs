//! The error value returned by parsing, validation and command handlers.

use std::io;

use netschedule_types::{ErrorCode, Reply};
use thiserror::Error;

use crate::queue::QueueError;

/// Failure of a single protocol step, reported as one `ERR:` line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    code: ErrorCode,
    message: String,
    fatal: bool,
}

impl CommandError {
    /// Creates an error with the given code.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fatal: false,
        }
    }

    /// Malformed line, unknown command or field.
    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolSyntaxError, message)
    }

    /// Parse error pointing at a 1-based column of the original line.
    #[must_use]
    pub fn syntax_at(line: &str, column: usize, message: impl AsRef<str>) -> Self {
        Self::syntax(format!(
            "{} at column {column} of '{line}'",
            message.as_ref()
        ))
    }

    /// Semantically invalid parameter.
    #[must_use]
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, message)
    }

    /// Missing role.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AccessDenied, message)
    }

    /// Queue does not exist or none is bound.
    #[must_use]
    pub fn unknown_queue(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownQueue, message)
    }

    /// Submissions are refused.
    #[must_use]
    pub fn submits_disabled() -> Self {
        Self::new(ErrorCode::SubmitsDisabled, "server is not accepting submissions")
    }

    /// Unclassified failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Taxonomy code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable explanation.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` when the connection must close after reporting.
    #[must_use]
    pub fn closes_connection(&self) -> bool {
        self.fatal || self.code.closes_connection()
    }

    /// Returns `true` when the whole server must shut down.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Converts the error into its reply line.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        Reply::error(self.code, self.message.clone())
    }
}

impl From<QueueError> for CommandError {
    fn from(error: QueueError) -> Self {
        let code = match &error {
            QueueError::UnknownQueue(_) => ErrorCode::UnknownQueue,
            QueueError::JobNotFound { .. } => ErrorCode::JobNotFound,
            QueueError::InvalidStatus { .. } => ErrorCode::InvalidJobStatus,
            QueueError::InvalidAuthToken { .. } => ErrorCode::InvalidAuthToken,
            QueueError::QueueExists(_)
            | QueueError::UnknownClass(_)
            | QueueError::StaticQueue(_) => ErrorCode::InvalidParameter,
            QueueError::Storage(_) => ErrorCode::InternalError,
        };
        Self {
            code,
            message: error.to_string(),
            fatal: error.is_fatal(),
        }
    }
}

impl From<io::Error> for CommandError {
    fn from(error: io::Error) -> Self {
        Self::new(ErrorCode::SocketIoError, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobStatus;

    #[test]
    fn storage_failures_are_fatal() {
        let error = CommandError::from(QueueError::storage("corrupt"));
        assert_eq!(error.code(), ErrorCode::InternalError);
        assert!(error.is_fatal());
        assert!(error.closes_connection());
    }

    #[test]
    fn status_conflicts_keep_the_connection() {
        let error = CommandError::from(QueueError::invalid_status(7, JobStatus::Done, "cancel"));
        assert_eq!(error.code(), ErrorCode::InvalidJobStatus);
        assert!(!error.closes_connection());
        assert_eq!(
            error.to_reply().to_string(),
            "ERR:eInvalidJobStatus:job 7 is Done; cannot cancel"
        );
    }

    #[test]
    fn syntax_errors_name_the_column() {
        let error = CommandError::syntax_at("FOO x=1", 1, "unknown command 'FOO'");
        assert_eq!(
            error.message(),
            "unknown command 'FOO' at column 1 of 'FOO x=1'"
        );
    }
}
