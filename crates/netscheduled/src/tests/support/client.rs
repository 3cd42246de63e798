//! Minimal line-oriented protocol client.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// A connected client speaking the newline-terminated protocol.
pub struct LineClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl LineClient {
    /// Connects to `addr` without sending the handshake.
    #[must_use]
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set read timeout");
        let writer = stream.try_clone().expect("clone stream");
        Self {
            reader: BufReader::new(stream),
            writer,
        }
    }

    /// Connects and completes the handshake for `client` on `queue`.
    #[must_use]
    pub fn handshake(addr: SocketAddr, client: &str, queue: &str) -> Self {
        let mut connection = Self::connect(addr);
        connection.send(&format!("client={client} client_node=test-node client_session=s1"));
        connection.send(queue);
        connection
    }

    /// Writes one line.
    pub fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).expect("write line");
        self.writer.write_all(b"\n").expect("write newline");
        self.writer.flush().expect("flush");
    }

    /// Reads one reply line; `None` once the server has closed the
    /// connection.
    pub fn receive(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_owned()),
            Err(error) if error.kind() == ErrorKind::ConnectionReset => None,
            Err(error) => panic!("read failed: {error}"),
        }
    }

    /// Sends `line` and returns the single reply line.
    pub fn request(&mut self, line: &str) -> String {
        self.send(line);
        self.receive().expect("server closed the connection")
    }

    /// Reads lines until `END` or the connection closes.
    pub fn receive_listing(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.receive() {
            if line == "OK:END" || line == "END" {
                break;
            }
            lines.push(line);
        }
        lines
    }
}
