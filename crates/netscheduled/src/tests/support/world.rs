//! BDD test world: owns the loader, reporter, server handles and connected
//! clients for step functions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::bootstrap::{BootstrapError, ConfigLoader, RunningServer, Server, bootstrap_with};
use crate::server::{ServerContext, ShutdownMode};

use super::client::LineClient;
use super::config_loader::{failing_loader, test_loader, unix_loader};
use super::reporter::{HealthEvent, RecordingHealthReporter};

/// Scenario world shared across BDD steps.
pub struct ServerWorld {
    loader: Arc<dyn ConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    socket_dir: Option<TempDir>,
    server: Option<Server>,
    running: Option<RunningServer>,
    bootstrap_error: Option<BootstrapError>,
    pub lingering: Option<usize>,
    clients: Vec<(String, LineClient)>,
    last_client: Option<String>,
    pub replies: Vec<String>,
    pub job_key: Option<String>,
    pub batch_start: Option<u64>,
}

impl ServerWorld {
    /// Builds a world with a loopback TCP configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loader: test_loader(),
            reporter: Arc::new(RecordingHealthReporter::default()),
            socket_dir: None,
            server: None,
            running: None,
            bootstrap_error: None,
            lingering: None,
            clients: Vec::new(),
            last_client: None,
            replies: Vec::new(),
            job_key: None,
            batch_start: None,
        }
    }

    /// Installs the loopback TCP loader.
    pub fn use_healthy_loader(&mut self) {
        self.loader = test_loader();
        self.socket_dir = None;
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.loader = failing_loader();
    }

    /// Installs a loader listening on a Unix socket in a fresh directory.
    pub fn use_unix_loader(&mut self) {
        let dir = TempDir::new().expect("create socket directory");
        self.loader = unix_loader(&dir);
        self.socket_dir = Some(dir);
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.server.is_some() || self.running.is_some() || self.bootstrap_error.is_some() {
            return;
        }
        let reporter = Arc::clone(&self.reporter);
        match bootstrap_with(Arc::clone(&self.loader), reporter) {
            Ok(server) => self.server = Some(server),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    /// Bootstraps if needed and starts accepting connections.
    pub fn start(&mut self) {
        self.bootstrap();
        let server = self.server.take().expect("bootstrap should have succeeded");
        self.running = Some(server.start().expect("listener should start"));
    }

    /// Error reported by bootstrap, if any.
    #[must_use]
    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    /// Bootstrapped server that has not been started yet.
    #[must_use]
    pub fn server(&self) -> Option<&Server> {
        self.server.as_ref()
    }

    /// Shared context of the running server.
    #[must_use]
    pub fn context(&self) -> Arc<ServerContext> {
        let running = self.running.as_ref().expect("server should be running");
        Arc::clone(running.context())
    }

    fn addr(&self) -> SocketAddr {
        self.running
            .as_ref()
            .and_then(RunningServer::tcp_addr)
            .expect("server should listen on TCP")
    }

    /// Connects `label` as `client`, completing the handshake on `queue`.
    pub fn connect(&mut self, label: &str, client: &str, queue: &str) {
        let connection = LineClient::handshake(self.addr(), client, queue);
        self.clients.retain(|(existing, _)| existing.as_str() != label);
        self.clients.push((label.to_owned(), connection));
        self.last_client = Some(label.to_owned());
    }

    /// Opens a connection for `label` without sending the handshake.
    pub fn connect_raw(&mut self, label: &str) {
        let connection = LineClient::connect(self.addr());
        self.clients.retain(|(existing, _)| existing.as_str() != label);
        self.clients.push((label.to_owned(), connection));
        self.last_client = Some(label.to_owned());
    }

    /// Connection opened for `label`.
    pub fn client(&mut self, label: &str) -> &mut LineClient {
        self.clients
            .iter_mut()
            .find_map(|(existing, client)| (existing.as_str() == label).then_some(client))
            .unwrap_or_else(|| panic!("client '{label}' should be connected"))
    }

    /// Sends `line` as `label` and records the reply.
    pub fn request(&mut self, label: &str, line: &str) -> String {
        self.last_client = Some(label.to_owned());
        let reply = self.client(label).request(line);
        self.replies.push(reply.clone());
        reply
    }

    /// Reads the next line on `label`'s connection and records it.
    pub fn receive(&mut self, label: &str) -> Option<String> {
        let reply = self.client(label).receive();
        if let Some(reply) = &reply {
            self.replies.push(reply.clone());
        }
        reply
    }

    /// Label of the client that connected or sent a request last.
    #[must_use]
    pub fn last_client(&self) -> String {
        self.last_client.clone().expect("a client should have been used")
    }

    /// Most recent reply.
    #[must_use]
    pub fn last_reply(&self) -> &str {
        self.replies.last().map(String::as_str).unwrap_or_default()
    }

    /// Stops the running server with a short grace period.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let lingering = running
                .stop(Duration::from_secs(2))
                .expect("listener should stop cleanly");
            self.lingering = Some(lingering);
        }
    }

    /// Recorded health events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.reporter.events()
    }

    /// Unix socket directory, when the scenario uses one.
    #[must_use]
    pub fn socket_dir(&self) -> Option<&TempDir> {
        self.socket_dir.as_ref()
    }
}

impl Default for ServerWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ServerWorld {
    fn drop(&mut self) {
        self.clients.clear();
        if let Some(running) = self.running.take() {
            running.context().request_shutdown(ShutdownMode::Now);
            let _ = running.stop(Duration::ZERO);
        }
    }
}
