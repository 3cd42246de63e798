//! Accept loop for the server socket.
//!
//! The bound socket is switched to non-blocking accepts so the loop can
//! notice the stop flag between polls. Every accepted client is served on a
//! thread of its own; a Unix socket file is removed once its listener is
//! dropped.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use netschedule_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use camino::Utf8Path;
#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

const IDLE_POLL: Duration = Duration::from_millis(25);
const FAILED_ACCEPT_PAUSE: Duration = Duration::from_millis(150);

/// Listen socket bound to the configured endpoint.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    socket: BoundSocket,
}

#[derive(Debug)]
enum BoundSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl BoundSocket {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(socket) => socket.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(socket) => socket.set_nonblocking(true),
        }
    }

    /// Accepts one pending client; `None` when nobody is waiting.
    fn poll_accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(socket) => socket.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::Tcp(stream))
            }),
            #[cfg(unix)]
            Self::Unix(socket) => socket.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::Unix(stream))
            }),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl SocketListener {
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let socket = match endpoint {
            SocketEndpoint::Tcp { host, port } => TcpListener::bind((host.as_str(), *port))
                .map(BoundSocket::Tcp)
                .map_err(|source| ListenerError::Bind {
                    endpoint: endpoint.to_string(),
                    source,
                })?,
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => {
                reclaim_stale_socket(path)?;
                UnixListener::bind(path.as_std_path())
                    .map(BoundSocket::Unix)
                    .map_err(|source| ListenerError::Bind {
                        endpoint: endpoint.to_string(),
                        source,
                    })?
            }
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            socket,
        })
    }

    /// Bound TCP address; reports the real port when `0` was requested.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            BoundSocket::Tcp(socket) => socket.local_addr().ok(),
            #[cfg(unix)]
            BoundSocket::Unix(_) => None,
        }
    }

    /// Moves the socket onto a background accept loop.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        self.socket
            .set_nonblocking()
            .map_err(|source| ListenerError::NonBlocking {
                endpoint: self.endpoint.to_string(),
                source,
            })?;
        let stop = Arc::new(AtomicBool::new(false));
        let accept_loop = AcceptLoop {
            listener: self,
            stop: Arc::clone(&stop),
            handler,
        };
        let thread = thread::spawn(move || accept_loop.run());
        Ok(ListenerHandle {
            stop,
            thread: Some(thread),
        })
    }
}

#[cfg(unix)]
impl Drop for SocketListener {
    fn drop(&mut self) {
        let SocketEndpoint::Unix { path } = &self.endpoint else {
            return;
        };
        if let Err(error) = fs::remove_file(path.as_std_path())
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: LISTENER_TARGET,
                error = %error,
                path = %path,
                "failed to remove socket file"
            );
        }
    }
}

/// Control over the background accept loop.
pub(crate) struct ListenerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept loop to stop at its next poll.
    pub(crate) fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept loop to exit.
    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        self.thread
            .take()
            .map_or(Ok(()), |thread| thread.join().map_err(|_| ListenerError::ThreadPanic))
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct AcceptLoop {
    listener: SocketListener,
    stop: Arc<AtomicBool>,
    handler: Arc<dyn ConnectionHandler>,
}

impl AcceptLoop {
    fn run(self) {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.listener.endpoint,
            "accepting NetSchedule clients"
        );
        let mut accepted = 0_u64;
        let mut repeated_failure = None::<io::ErrorKind>;
        while !self.stop.load(Ordering::SeqCst) {
            match self.listener.socket.poll_accept() {
                Ok(Some(stream)) => {
                    repeated_failure = None;
                    accepted += 1;
                    self.serve(stream, accepted);
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(error) => {
                    if repeated_failure != Some(error.kind()) {
                        warn!(target: LISTENER_TARGET, error = %error, "accept failed");
                    }
                    repeated_failure = Some(error.kind());
                    thread::sleep(FAILED_ACCEPT_PAUSE);
                }
            }
        }
        debug!(target: LISTENER_TARGET, accepted, "accept loop stopped");
    }

    fn serve(&self, stream: ConnectionStream, sequence: u64) {
        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name(format!("ns-conn-{sequence}"))
            .spawn(move || handler.handle(stream));
        if let Err(error) = spawned {
            warn!(
                target: LISTENER_TARGET,
                error = %error,
                "no thread for client; connection dropped"
            );
        }
    }
}

/// Removes a socket file left behind by a server that is gone. A socket
/// that still accepts connections belongs to a live server and is kept.
#[cfg(unix)]
fn reclaim_stale_socket(path: &Utf8Path) -> Result<(), ListenerError> {
    let stale = |source| ListenerError::StaleSocket {
        path: path.to_path_buf(),
        source,
    };
    let metadata = match fs::symlink_metadata(path.as_std_path()) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(stale(error)),
    };
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::NotASocket {
            path: path.to_path_buf(),
        });
    }
    if UnixStream::connect(path.as_std_path()).is_ok() {
        return Err(ListenerError::UnixInUse {
            path: path.to_path_buf(),
        });
    }
    fs::remove_file(path.as_std_path()).map_err(stale)
}
