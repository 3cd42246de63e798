//! Per-connection protocol state machine.
//!
//! A connection authenticates with two lines (client description, then queue
//! name) and then issues one command per line. Batch submission nests a
//! second state machine inside the command loop.

use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use netschedule_types::ErrorCode;
use tracing::{debug, error, info, info_span, warn};

use super::batch::{self, BatchSession};
use super::dispatch;
use super::identity::ClientIdentity;
use super::response::ResponseWriter;
use super::rollback::Outcome;
use super::table::{BATCH_HEADER, BATCH_TRAILER, COMMANDS, CommandTable};
use super::{CommandError, PROTOCOL_TARGET};
use crate::bootstrap::ConfigLoader;
use crate::queue::QueueService;
use crate::server::{ServerContext, ShutdownMode};

/// Collaborators shared by every session of a server.
#[derive(Clone)]
pub struct ProtocolServices {
    /// Server-wide context.
    pub server: Arc<ServerContext>,
    /// Queue store and scheduler.
    pub queues: Arc<dyn QueueService>,
    /// Source of fresh configuration for `RECO`.
    pub reloader: Option<Arc<dyn ConfigLoader>>,
}

impl ProtocolServices {
    /// Bundles the server context and queue service.
    #[must_use]
    pub fn new(server: Arc<ServerContext>, queues: Arc<dyn QueueService>) -> Self {
        Self {
            server,
            queues,
            reloader: None,
        }
    }

    /// Enables `RECO` by supplying a configuration loader.
    #[must_use]
    pub fn with_reloader(mut self, reloader: Arc<dyn ConfigLoader>) -> Self {
        self.reloader = Some(reloader);
        self
    }
}

impl fmt::Debug for ProtocolServices {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ProtocolServices")
            .field("server", &self.server)
            .field("reloadable", &self.reloader.is_some())
            .finish_non_exhaustive()
    }
}

/// Where an authenticated connection is in the command protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Ordinary commands.
    CommandLoop,
    /// Inside a `BSUB` session, between batches.
    BatchHeader,
    /// Reading the job lines of a batch.
    BatchJobLines,
    /// Waiting for `ENDB`.
    BatchTrailer,
}

/// State of an authenticated connection.
#[derive(Debug)]
pub struct SessionState {
    /// Identity bound at handshake or by `SETQUEUE`.
    pub identity: ClientIdentity,
    /// Open batch session, if any.
    pub batch: Option<BatchSession>,
}

impl SessionState {
    /// Creates the state for a freshly authenticated client.
    #[must_use]
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity,
            batch: None,
        }
    }

    /// Current phase, derived from the batch session.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match &self.batch {
            None => Phase::CommandLoop,
            Some(session) if !session.has_pending_batch() => Phase::BatchHeader,
            Some(session) if session.awaiting_jobs() => Phase::BatchJobLines,
            Some(_) => Phase::BatchTrailer,
        }
    }

    /// Returns `true` between the start and the end of a batch session.
    #[must_use]
    pub fn within_batch_submit(&self) -> bool {
        self.batch.is_some()
    }
}

enum Stage {
    AwaitingAuth,
    AwaitingQueue { auth_line: String },
    Ready(SessionState),
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent `QUIT`.
    Quit,
    /// The client closed its end.
    PeerClosed,
    /// The first line was an HTTP `GET` probe.
    HttpProbe,
    /// The client stayed silent past the idle timeout.
    IdleTimeout,
    /// An error that ends the connection was reported (or could not be).
    Error(ErrorCode),
}

/// One client connection speaking the line protocol.
pub struct Session<R, W> {
    services: ProtocolServices,
    reader: R,
    writer: ResponseWriter<W>,
    peer: IpAddr,
    connection_id: u64,
    stage: Stage,
}

impl<R: BufRead, W: Write> Session<R, W> {
    /// Creates a session for a client at `peer`.
    pub fn new(services: ProtocolServices, peer: IpAddr, reader: R, writer: W) -> Self {
        let connection_id = services.server.next_connection_id();
        Self {
            services,
            reader,
            writer: ResponseWriter::new(writer),
            peer,
            connection_id,
            stage: Stage::AwaitingAuth,
        }
    }

    /// Connection id used in diagnostics.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Serves lines until the connection ends.
    pub fn run(mut self) -> CloseReason {
        loop {
            let verdict = match self.read_line() {
                Ok(Incoming::Line(line)) => self.handle_line(&line),
                Ok(Incoming::Undecodable) => self.undecodable_line(),
                Ok(Incoming::End) => return CloseReason::PeerClosed,
                Err(error) => return self.read_failed(&error),
            };
            if let Some(reason) = verdict {
                self.stage = Stage::Closed;
                return reason;
            }
        }
    }

    /// Processes one line; returns the reason when the connection must close.
    pub fn handle_line(&mut self, line: &str) -> Option<CloseReason> {
        match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::AwaitingAuth => {
                if is_http_probe(line) {
                    debug!(target: PROTOCOL_TARGET, connection_id = self.connection_id, "HTTP probe");
                    return Some(CloseReason::HttpProbe);
                }
                self.stage = Stage::AwaitingQueue {
                    auth_line: line.to_owned(),
                };
                None
            }
            Stage::AwaitingQueue { auth_line } => match self.authenticate(&auth_line, line) {
                Ok(identity) => {
                    self.stage = Stage::Ready(SessionState::new(identity));
                    None
                }
                Err(error) => self.report(&error).or(Some(CloseReason::Error(error.code()))),
            },
            Stage::Ready(mut state) => {
                let outcome = self.serve(&mut state, line);
                self.stage = Stage::Ready(state);
                outcome
            }
            Stage::Closed => Some(CloseReason::PeerClosed),
        }
    }

    fn authenticate(
        &mut self,
        auth_line: &str,
        queue_line: &str,
    ) -> Result<ClientIdentity, CommandError> {
        let unbound = ClientIdentity::authenticate(auth_line, self.connection_id, self.peer)?;
        let policy = self.services.server.policy();
        let identity = unbound.bind(Some(queue_line), &policy, self.services.queues.as_ref())?;
        info!(
            target: PROTOCOL_TARGET,
            event = "client_authenticated",
            connection_id = self.connection_id,
            peer = %self.peer,
            client = %identity.client_name,
            client_node = %identity.client_node,
            client_session = %identity.client_session,
            program = identity.program.as_deref().unwrap_or_default(),
            queue = identity.queue.as_deref().unwrap_or_default(),
            roles = ?identity.capabilities.role_names(),
            "client authenticated"
        );
        if let Some(queue) = identity.queue.as_deref() {
            self.services.queues.touch_client(queue, identity.record())?;
        }
        Ok(identity)
    }

    fn serve(&mut self, state: &mut SessionState, line: &str) -> Option<CloseReason> {
        if line.trim().is_empty() {
            return None;
        }
        if self.services.server.shutdown_flag().load(Ordering::SeqCst) {
            let error = CommandError::new(ErrorCode::ShuttingDown, "server is shutting down");
            return self.report(&error).or(Some(CloseReason::Error(error.code())));
        }

        let result = match state.phase() {
            Phase::CommandLoop => self.execute(&COMMANDS, state, line),
            Phase::BatchHeader => self.execute(&BATCH_HEADER, state, line),
            Phase::BatchJobLines => {
                batch::accept_job_line(state, line, self.services.server.limits())
            }
            Phase::BatchTrailer => self.execute(&BATCH_TRAILER, state, line),
        };

        match result {
            Ok(outcome) => self.deliver(outcome),
            Err(error) => {
                if state.batch.take().is_some() {
                    debug!(target: PROTOCOL_TARGET, connection_id = self.connection_id, "batch discarded");
                }
                self.report(&error)
            }
        }
    }

    fn execute(
        &mut self,
        table: &CommandTable,
        state: &mut SessionState,
        line: &str,
    ) -> Result<Outcome, CommandError> {
        let parsed = dispatch::parse(table, line)?;
        let descriptor = parsed.descriptor;
        let request_id = self.services.server.next_request_id();
        let arguments = if descriptor.redact_arguments {
            "<redacted>"
        } else {
            line
        };
        let span = info_span!(
            target: PROTOCOL_TARGET,
            "request",
            request_id,
            connection_id = self.connection_id,
            command = descriptor.name,
            arguments,
        );
        let _entered = span.enter();
        debug!(target: PROTOCOL_TARGET, "request started");
        let started = Instant::now();
        let result = dispatch::run(descriptor, &parsed.params, &self.services, state, request_id);
        debug!(
            target: PROTOCOL_TARGET,
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            succeeded = result.is_ok(),
            "request finished"
        );
        result
    }

    fn deliver(&mut self, outcome: Outcome) -> Option<CloseReason> {
        match outcome {
            Outcome::Silent => None,
            Outcome::Close => Some(CloseReason::Quit),
            Outcome::Reply(response) => match self.writer.write_response(&response) {
                Ok(()) => None,
                Err(error) => Some(self.write_failed(&error)),
            },
            Outcome::Guarded { reply, rollback } => match self.writer.write_response(&reply) {
                Ok(()) => {
                    rollback.commit();
                    None
                }
                Err(error) => {
                    if let Err(undo) = rollback.execute(self.services.queues.as_ref()) {
                        let undo = CommandError::from(undo);
                        error!(target: PROTOCOL_TARGET, error = %undo, "rollback failed");
                        self.escalate(&undo);
                    }
                    Some(self.write_failed(&error))
                }
            },
        }
    }

    /// Writes `error` to the client; returns the close reason when the
    /// connection cannot continue.
    fn report(&mut self, error: &CommandError) -> Option<CloseReason> {
        self.escalate(error);
        debug!(
            target: PROTOCOL_TARGET,
            connection_id = self.connection_id,
            code = %error.code(),
            message = error.message(),
            "command failed"
        );
        if let Err(write_error) = self.writer.write_error(error) {
            return Some(self.write_failed(&write_error));
        }
        error
            .closes_connection()
            .then_some(CloseReason::Error(error.code()))
    }

    fn escalate(&self, error: &CommandError) {
        if error.is_fatal() {
            error!(target: PROTOCOL_TARGET, %error, "fatal queue failure; shutting down");
            self.services.server.request_shutdown(ShutdownMode::Normal);
        }
    }

    fn write_failed(&self, error: &CommandError) -> CloseReason {
        warn!(
            target: PROTOCOL_TARGET,
            connection_id = self.connection_id,
            %error,
            "failed to write reply"
        );
        CloseReason::Error(ErrorCode::SocketIoError)
    }

    fn read_failed(&mut self, error: &io::Error) -> CloseReason {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => CloseReason::IdleTimeout,
            io::ErrorKind::InvalidData => {
                let error = CommandError::syntax(error.to_string());
                self.report(&error)
                    .unwrap_or(CloseReason::Error(ErrorCode::ProtocolSyntaxError))
            }
            _ => {
                debug!(target: PROTOCOL_TARGET, connection_id = self.connection_id, %error, "read failed");
                CloseReason::Error(ErrorCode::SocketIoError)
            }
        }
    }

    /// Reports a line that is not UTF-8. During the handshake it ends the
    /// connection; afterwards it fails like any other malformed command.
    fn undecodable_line(&mut self) -> Option<CloseReason> {
        match &mut self.stage {
            Stage::Ready(state) => {
                state.batch = None;
                self.report(&CommandError::syntax("request line is not valid UTF-8"))
            }
            Stage::AwaitingAuth | Stage::AwaitingQueue { .. } => {
                let error = CommandError::new(
                    ErrorCode::AuthenticationError,
                    "handshake line is not valid UTF-8",
                );
                self.report(&error).or(Some(CloseReason::Error(error.code())))
            }
            Stage::Closed => Some(CloseReason::PeerClosed),
        }
    }

    fn read_line(&mut self) -> io::Result<Incoming> {
        let limit = self.line_limit();
        let mut bytes = Vec::new();
        let read = (&mut self.reader).take(limit).read_until(b'\n', &mut bytes)?;
        if read == 0 {
            return Ok(Incoming::End);
        }
        if !bytes.ends_with(b"\n") && u64::try_from(read).unwrap_or(u64::MAX) >= limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request line exceeds {limit} bytes"),
            ));
        }
        while let Some(b'\r' | b'\n') = bytes.last() {
            bytes.pop();
        }
        Ok(String::from_utf8(bytes).map_or(Incoming::Undecodable, Incoming::Line))
    }

    fn line_limit(&self) -> u64 {
        let input = self.services.server.limits().max_input_size;
        u64::try_from(input.saturating_mul(3).saturating_add(4096)).unwrap_or(u64::MAX)
    }
}

/// One read from the client.
enum Incoming {
    Line(String),
    Undecodable,
    End,
}

fn is_http_probe(line: &str) -> bool {
    line.starts_with("GET /") && line.contains(" HTTP/")
}
