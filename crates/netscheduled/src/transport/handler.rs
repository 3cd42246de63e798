//! Accepted connection streams and the handler seam.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Stream types accepted by the listener.
#[derive(Debug)]
pub(crate) enum ConnectionStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Address of the remote end; Unix peers report the loopback address.
    pub(crate) fn peer_ip(&self) -> io::Result<IpAddr> {
        match self {
            Self::Tcp(stream) => stream.peer_addr().map(|addr| addr.ip()),
            #[cfg(unix)]
            Self::Unix(_) => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        }
    }

    /// Second handle to the same socket, used as the read half.
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }

    /// Bounds how long a read may block; `None` blocks forever.
    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
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

/// Handles accepted socket connections, one thread per connection.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Serves a single connection until it ends. Implementations should
    /// avoid panicking.
    fn handle(&self, stream: ConnectionStream);
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn cloned_tcp_halves_share_the_socket() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        let addr = listener.local_addr().expect("listener address");
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept connection");
            let mut writer = ConnectionStream::Tcp(stream);
            assert!(writer.peer_ip().expect("peer").is_loopback());
            let reader = writer.try_clone().expect("clone");
            let mut line = String::new();
            BufReader::new(reader).read_line(&mut line).expect("read");
            writer.write_all(line.to_uppercase().as_bytes()).expect("write");
        });

        let mut client = TcpStream::connect(addr).expect("connect client");
        client.write_all(b"ping\n").expect("write request");
        let mut response = String::new();
        BufReader::new(&mut client)
            .read_line(&mut response)
            .expect("read response");
        assert_eq!(response, "PING\n");
        server.join().expect("join server");
    }

    #[test]
    fn read_timeout_surfaces_as_an_error() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        let addr = listener.local_addr().expect("listener address");
        let _client = TcpStream::connect(addr).expect("connect client");
        let (stream, _) = listener.accept().expect("accept connection");
        let mut stream = ConnectionStream::Tcp(stream);
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .expect("set timeout");
        let error = stream.read(&mut [0_u8; 8]).expect_err("timed out");
        assert!(matches!(
            error.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
    }
}
