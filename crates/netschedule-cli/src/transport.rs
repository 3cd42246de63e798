//! Socket transport for `nsadmin`.
//!
//! [`connect`] dials a [`SocketEndpoint`] and wraps the stream in a uniform
//! [`Connection`]; [`LineChannel`] speaks the line protocol over it: the
//! two-line handshake, single replies and `OK:END`-terminated listings.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use netschedule_config::SocketEndpoint;
use netschedule_types::Reply;

#[cfg(unix)]
use std::os::fd::OwnedFd;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

use crate::AppError;

pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Queue line sent when the session is not bound to a queue.
pub(crate) const NO_QUEUE: &str = "noname";

pub(crate) enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(Some(timeout)),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(Some(timeout)),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

pub(crate) fn connect(endpoint: &SocketEndpoint) -> Result<Connection, AppError> {
    let connection = match endpoint {
        SocketEndpoint::Tcp { host, port } => {
            let address = resolve_tcp_address(host, *port).map_err(|source| AppError::Resolve {
                endpoint: endpoint.to_string(),
                source,
            })?;
            TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT).map(Connection::Tcp)
        }
        SocketEndpoint::Unix { path } => {
            #[cfg(unix)]
            {
                connect_unix(path.as_str())
            }

            #[cfg(not(unix))]
            {
                let _ = path;
                return Err(AppError::UnsupportedUnixTransport(endpoint.to_string()));
            }
        }
    };
    let connection = connection.map_err(|source| AppError::Connect {
        endpoint: endpoint.to_string(),
        source,
    })?;
    connection
        .set_read_timeout(REPLY_TIMEOUT)
        .map_err(|source| AppError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
    Ok(connection)
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(unix)]
fn connect_unix(path: &str) -> io::Result<Connection> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, CONNECTION_TIMEOUT)?;
    Ok(Connection::Unix(UnixStream::from(OwnedFd::from(socket))))
}

/// Line-protocol session over any byte stream.
pub(crate) struct LineChannel<S> {
    stream: BufReader<S>,
}

impl<S: Read + Write> LineChannel<S> {
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Sends the client line and the queue line. The server only answers
    /// the handshake when it rejects it.
    pub(crate) fn handshake(&mut self, client: &str, queue: Option<&str>) -> Result<(), AppError> {
        self.send(client)?;
        self.send(queue.unwrap_or(NO_QUEUE))
    }

    pub(crate) fn send(&mut self, line: &str) -> Result<(), AppError> {
        let stream = self.stream.get_mut();
        stream
            .write_all(line.as_bytes())
            .and_then(|()| stream.write_all(b"\n"))
            .and_then(|()| stream.flush())
            .map_err(AppError::SendRequest)
    }

    /// Sends `line` and returns the payload of its single `OK:` reply.
    pub(crate) fn request(&mut self, line: &str) -> Result<String, AppError> {
        self.send(line)?;
        self.receive_ok()
    }

    /// Sends `line` and collects `OK:` payloads up to the terminator.
    pub(crate) fn listing(&mut self, line: &str) -> Result<Vec<String>, AppError> {
        self.send(line)?;
        let mut payloads = Vec::new();
        loop {
            let reply = self.receive()?;
            if reply.is_end_of_listing() {
                return Ok(payloads);
            }
            payloads.push(ok_payload(reply)?);
        }
    }

    fn receive_ok(&mut self) -> Result<String, AppError> {
        let reply = self.receive()?;
        ok_payload(reply)
    }

    fn receive(&mut self) -> Result<Reply, AppError> {
        let mut line = String::new();
        let read = self
            .stream
            .read_line(&mut line)
            .map_err(AppError::ReadReply)?;
        if read == 0 {
            return Err(AppError::ConnectionClosed);
        }
        Ok(Reply::parse(&line)?)
    }
}

fn ok_payload(reply: Reply) -> Result<String, AppError> {
    match reply {
        Reply::Ok(payload) => Ok(payload),
        failure @ Reply::Err { .. } => Err(AppError::Server(failure.to_string())),
    }
}
