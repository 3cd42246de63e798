//! Reply framing for the command loop.
//!
//! Every command yields one terminating status line. Listings are a series
//! of `OK:` lines closed by `OK:END`. Payloads never carry raw line breaks.

use std::fmt::Display;
use std::io::Write;

use netschedule_types::{END_OF_LISTING, Reply};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use super::CommandError;

/// Characters escaped inside `name=value` reply fields.
const FIELD_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'=');

/// What a command writes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// One status line.
    Line(Reply),
    /// Several `OK:` lines followed by `OK:END`.
    Listing(Vec<String>),
}

impl Response {
    /// Successful single-line reply.
    #[must_use]
    pub fn ok(payload: impl Into<String>) -> Self {
        Self::Line(Reply::Ok(payload.into()))
    }

    /// Multi-line listing.
    #[must_use]
    pub fn listing(lines: Vec<String>) -> Self {
        Self::Listing(lines)
    }

    /// Successful reply carrying `name=value` pairs.
    #[must_use]
    pub fn fields(fields: &Fields) -> Self {
        Self::ok(fields.to_string())
    }
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        Self::Line(reply)
    }
}

/// Builder for `a=1&b=2` payloads with escaped values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    rendered: String,
}

impl Fields {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one field.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Display) -> Self {
        if !self.rendered.is_empty() {
            self.rendered.push('&');
        }
        self.rendered.push_str(name);
        self.rendered.push('=');
        self.rendered.push_str(&encode_value(&value.to_string()));
        self
    }
}

impl std::fmt::Display for Fields {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.rendered)
    }
}

/// Escapes a value so it survives tokenisation by the peer.
#[must_use]
pub fn encode_value(value: &str) -> String {
    utf8_percent_encode(value, FIELD_VALUE).to_string()
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Writes replies to a connection.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    /// Creates a writer over the given output stream.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one status line and flushes.
    ///
    /// # Errors
    ///
    /// Returns `eSocketIOError` when the peer cannot be written to.
    pub fn write_reply(&mut self, reply: &Reply) -> Result<(), CommandError> {
        let line = match reply {
            Reply::Ok(payload) => Reply::Ok(single_line(payload)),
            Reply::Err { code, message } => Reply::Err {
                code: code.clone(),
                message: single_line(message),
            },
        };
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Writes a full response, including the listing terminator.
    ///
    /// # Errors
    ///
    /// Returns `eSocketIOError` when the peer cannot be written to.
    pub fn write_response(&mut self, response: &Response) -> Result<(), CommandError> {
        match response {
            Response::Line(reply) => self.write_reply(reply),
            Response::Listing(lines) => {
                for line in lines {
                    writeln!(self.writer, "OK:{}", single_line(line))?;
                }
                self.write_reply(&Reply::Ok(END_OF_LISTING.to_owned()))
            }
        }
    }

    /// Writes the reply for a failed command.
    ///
    /// # Errors
    ///
    /// Returns `eSocketIOError` when the peer cannot be written to.
    pub fn write_error(&mut self, error: &CommandError) -> Result<(), CommandError> {
        self.write_reply(&error.to_reply())
    }

    /// Returns the underlying stream.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}
