//! Reply line framing.

use std::fmt;

use thiserror::Error;

use crate::ErrorCode;

/// Payload of the `OK:` line that terminates a multi-line listing.
pub const END_OF_LISTING: &str = "END";

/// One reply line sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Successful reply carrying a payload (possibly empty).
    Ok(String),
    /// Failure reply.
    Err {
        /// Error code as sent by the server (for example `eJobNotFound`).
        code: String,
        /// Human-readable explanation.
        message: String,
    },
}

impl Reply {
    /// Builds a failure reply from a taxonomy code.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Err {
            code: code.as_str().to_owned(),
            message: message.into(),
        }
    }

    /// Parses a reply line; trailing CR/LF characters are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyParseError`] when the line starts with neither `OK:`
    /// nor `ERR:`.
    pub fn parse(line: &str) -> Result<Self, ReplyParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(payload) = line.strip_prefix("OK:") {
            return Ok(Self::Ok(payload.to_owned()));
        }
        if let Some(rest) = line.strip_prefix("ERR:") {
            let (code, message) = rest.split_once(':').unwrap_or((rest, ""));
            return Ok(Self::Err {
                code: code.to_owned(),
                message: message.to_owned(),
            });
        }
        Err(ReplyParseError(line.to_owned()))
    }

    /// Returns `true` for the `OK:END` terminator of multi-line listings.
    #[must_use]
    pub fn is_end_of_listing(&self) -> bool {
        matches!(self, Self::Ok(payload) if payload == END_OF_LISTING)
    }

    /// Returns the taxonomy code of a failure reply, when recognised.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Ok(_) => None,
            Self::Err { code, .. } => code.parse().ok(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(payload) => write!(formatter, "OK:{payload}"),
            Self::Err { code, message } => write!(formatter, "ERR:{code}:{message}"),
        }
    }
}

/// Error returned for lines that are not protocol replies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected reply line '{0}'")]
pub struct ReplyParseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_payload() {
        let reply = Reply::parse("OK:server_version=1.0\n").expect("parse ok");
        assert_eq!(reply, Reply::Ok("server_version=1.0".to_owned()));
    }

    #[test]
    fn error_message_keeps_embedded_colons() {
        let reply = Reply::parse("ERR:eJobNotFound:job 5: gone").expect("parse err");
        assert_eq!(reply.error_code(), Some(ErrorCode::JobNotFound));
        assert_eq!(reply.to_string(), "ERR:eJobNotFound:job 5: gone");
    }

    #[test]
    fn recognises_listing_terminator() {
        assert!(Reply::parse("OK:END").expect("parse").is_end_of_listing());
        assert!(!Reply::parse("OK:ENDB").expect("parse").is_end_of_listing());
    }

    #[test]
    fn rejects_unframed_lines() {
        assert!(Reply::parse("HTTP/1.0 200 OK").is_err());
    }
}
