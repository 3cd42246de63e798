//! Scripted NetSchedule server for behavioural tests.
//!
//! Accepts one connection, records every line the client sends and answers
//! each request line from a reply script. The two handshake lines get no
//! answer, matching the real server.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};

const HANDSHAKE_LINES: usize = 2;
const UNSCRIPTED: &str = "ERR:eProtocolSyntaxError:unscripted command";

pub(in crate::tests) struct FakeServer {
    port: u16,
    received: Arc<Mutex<Vec<String>>>,
    handle: Option<thread::JoinHandle<Result<()>>>,
}

impl FakeServer {
    /// Binds an ephemeral port and serves the first client with `script`,
    /// which maps request lines to the reply lines sent back.
    pub fn spawn(script: HashMap<String, Vec<String>>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake server")?;
        listener
            .set_nonblocking(true)
            .context("fake server nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handle = thread::spawn(move || match accept(&listener)? {
            Some(stream) => serve(stream, &script, &sink),
            None => Ok(()),
        });
        Ok(Self {
            port,
            received,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Waits for the session to end and returns every line the client sent.
    pub fn received(&mut self) -> Result<Vec<String>> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("fake server thread panicked"))?
                .context("fake server failed")?;
        }
        let received = self
            .received
            .lock()
            .map_err(|error| anyhow!("lock received lines: {error}"))?;
        Ok(received.clone())
    }
}

fn accept(listener: &TcpListener) -> Result<Option<TcpStream>> {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream
                    .set_nonblocking(false)
                    .context("blocking client stream")?;
                return Ok(Some(stream));
            }
            Err(ref error)
                if error.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline =>
            {
                thread::sleep(Duration::from_millis(10));
            }
            // Usage errors end the run before the client connects.
            Err(ref error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(error) => return Err(error).context("accept connection"),
        }
    }
}

fn serve(
    stream: TcpStream,
    script: &HashMap<String, Vec<String>>,
    received: &Mutex<Vec<String>>,
) -> Result<()> {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .context("read timeout")?;
    let mut writer = stream.try_clone().context("clone stream")?;
    let reader = BufReader::new(stream);
    for (index, read) in reader.lines().enumerate() {
        let line = read.context("read request line")?;
        received
            .lock()
            .map_err(|error| anyhow!("lock received lines: {error}"))?
            .push(line.clone());
        if index < HANDSHAKE_LINES {
            continue;
        }
        let replies = script
            .get(&line)
            .cloned()
            .unwrap_or_else(|| vec![UNSCRIPTED.to_owned()]);
        for reply in replies {
            writeln!(writer, "{reply}").context("write reply")?;
        }
        writer.flush().context("flush replies")?;
    }
    Ok(())
}
