//! Process-wide server state shared by every connection.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use netschedule_config::Config;
use strum::{Display, EnumString};
use tracing::info;

use crate::protocol::AccessPolicy;

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// How the server should stop once `SHUTDOWN` or a signal is received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ShutdownMode {
    /// Refuse submissions, stop accepting connections and exit.
    Normal,
    /// Exit immediately.
    Now,
    /// Exit immediately without any grace period; alias of `now`.
    Die,
    /// Refuse new submitters and exit once open batches have finished.
    Drain,
}

/// Limits applied to individual commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest `BTCH size=` value.
    pub max_batch_size: u32,
    /// Largest decoded job input.
    pub max_input_size: usize,
    /// Upper bound for client-requested waits.
    pub max_wait: Duration,
    /// Lease granted to a running job.
    pub run_timeout: Duration,
}

impl Limits {
    /// Extracts the command limits from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            max_input_size: config.max_input_size,
            max_wait: Duration::from_secs(config.max_wait_secs),
            run_timeout: Duration::from_secs(config.run_timeout_secs),
        }
    }
}

/// Shared server context: lifecycle flags, counters and the settings that
/// `RECO` may replace at runtime.
#[derive(Debug)]
pub struct ServerContext {
    host: String,
    port: u16,
    started: SystemTime,
    shutdown_requested: AtomicBool,
    immediate: AtomicBool,
    draining: AtomicBool,
    submits_disabled: AtomicBool,
    open_batches: AtomicUsize,
    active_connections: AtomicUsize,
    connection_ids: AtomicU64,
    request_ids: AtomicU64,
    settings: RwLock<Settings>,
}

#[derive(Debug, Clone)]
struct Settings {
    config: Arc<Config>,
    policy: Arc<AccessPolicy>,
    limits: Limits,
}

impl Settings {
    fn from_config(config: Config) -> Self {
        Self {
            policy: Arc::new(AccessPolicy::from_config(&config)),
            limits: Limits::from_config(&config),
            config: Arc::new(config),
        }
    }
}

impl ServerContext {
    /// Builds the context for a server advertised as `host:port`.
    #[must_use]
    pub fn new(config: Config, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            started: SystemTime::now(),
            shutdown_requested: AtomicBool::new(false),
            immediate: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            submits_disabled: AtomicBool::new(false),
            open_batches: AtomicUsize::new(0),
            active_connections: AtomicUsize::new(0),
            connection_ids: AtomicU64::new(0),
            request_ids: AtomicU64::new(0),
            settings: RwLock::new(Settings::from_config(config)),
        }
    }

    /// Builds the context from configuration, advertising the configured
    /// host and the listen port.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        let host = config.advertised_host();
        let port = config.listen().port();
        Self::new(config, host, port)
    }

    /// Host written into job keys and batch replies.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port written into job keys and batch replies.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Seconds since the Unix epoch at which the server started.
    #[must_use]
    pub fn started_at(&self) -> u64 {
        self.started
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }

    /// Seconds the server has been running.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed().unwrap_or_default()
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.read_settings().config)
    }

    /// Current access policy snapshot.
    #[must_use]
    pub fn policy(&self) -> Arc<AccessPolicy> {
        Arc::clone(&self.read_settings().policy)
    }

    /// Current command limits.
    #[must_use]
    pub fn limits(&self) -> Limits {
        self.read_settings().limits
    }

    /// Replaces the runtime-adjustable settings with those of `config`.
    ///
    /// The advertised host and port are fixed at start-up and unaffected.
    pub fn reconfigure(&self, config: Config) {
        let replacement = Settings::from_config(config);
        let mut settings = self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *settings = replacement;
        info!(target: SERVER_TARGET, "server settings reloaded");
    }

    fn read_settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records a shutdown request.
    pub fn request_shutdown(&self, mode: ShutdownMode) {
        info!(target: SERVER_TARGET, %mode, "shutdown requested");
        self.submits_disabled.store(true, Ordering::SeqCst);
        match mode {
            ShutdownMode::Drain => {
                self.draining.store(true, Ordering::SeqCst);
            }
            ShutdownMode::Now | ShutdownMode::Die => {
                self.immediate.store(true, Ordering::SeqCst);
                self.shutdown_requested.store(true, Ordering::SeqCst);
            }
            ShutdownMode::Normal => {
                self.shutdown_requested.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Flag polled by blocking queue operations so shutdown cancels them.
    #[must_use]
    pub fn shutdown_flag(&self) -> &AtomicBool {
        &self.shutdown_requested
    }

    /// Returns `true` once the process should stop serving.
    ///
    /// A drain becomes a shutdown when the last open batch closes.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return true;
        }
        if self.is_draining() && self.open_batches() == 0 {
            self.shutdown_requested.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    /// Returns `true` when shutdown skips the grace period.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        self.immediate.load(Ordering::SeqCst)
    }

    /// Returns `true` while the server drains open batches.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Returns `true` when new submissions must be refused.
    #[must_use]
    pub fn submits_disabled(&self) -> bool {
        self.submits_disabled.load(Ordering::SeqCst)
    }

    /// Number of batch sessions currently open.
    #[must_use]
    pub fn open_batches(&self) -> usize {
        self.open_batches.load(Ordering::SeqCst)
    }

    /// Number of connections currently served.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Allocates the next connection id.
    pub fn next_connection_id(&self) -> u64 {
        self.connection_ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Allocates the next request id.
    pub fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Counts an open batch until the returned guard drops.
    #[must_use]
    pub fn open_batch(self: &Arc<Self>) -> OpenBatchGuard {
        self.open_batches.fetch_add(1, Ordering::SeqCst);
        OpenBatchGuard {
            server: Arc::clone(self),
        }
    }

    /// Counts an active connection until the returned guard drops.
    #[must_use]
    pub fn connection_opened(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            server: Arc::clone(self),
        }
    }
}

/// Keeps the open-batch counter incremented while alive.
#[derive(Debug)]
pub struct OpenBatchGuard {
    server: Arc<ServerContext>,
}

impl Drop for OpenBatchGuard {
    fn drop(&mut self) {
        self.server.open_batches.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Keeps the active-connection counter incremented while alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    server: Arc<ServerContext>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.server.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn server() -> Arc<ServerContext> {
        Arc::new(ServerContext::new(Config::default(), "nshost", 9100))
    }

    #[rstest]
    fn batch_guard_tracks_open_batches(server: Arc<ServerContext>) {
        let first = server.open_batch();
        let second = server.open_batch();
        assert_eq!(server.open_batches(), 2);
        drop(first);
        assert_eq!(server.open_batches(), 1);
        drop(second);
        assert_eq!(server.open_batches(), 0);
    }

    #[rstest]
    fn drain_waits_for_open_batches(server: Arc<ServerContext>) {
        let guard = server.open_batch();
        server.request_shutdown(ShutdownMode::Drain);
        assert!(server.submits_disabled());
        assert!(!server.should_stop());
        drop(guard);
        assert!(server.should_stop());
    }

    #[rstest]
    #[case::normal(ShutdownMode::Normal, false)]
    #[case::now(ShutdownMode::Now, true)]
    #[case::die(ShutdownMode::Die, true)]
    fn shutdown_modes_stop_the_server(
        server: Arc<ServerContext>,
        #[case] mode: ShutdownMode,
        #[case] immediate: bool,
    ) {
        server.request_shutdown(mode);
        assert!(server.should_stop());
        assert_eq!(server.is_immediate(), immediate);
    }

    #[rstest]
    fn reconfigure_replaces_limits(server: Arc<ServerContext>) {
        let config = Config {
            max_batch_size: 3,
            ..Config::default()
        };
        server.reconfigure(config);
        assert_eq!(server.limits().max_batch_size, 3);
    }

    #[test]
    fn parses_shutdown_modes() {
        assert_eq!("DRAIN".parse::<ShutdownMode>().ok(), Some(ShutdownMode::Drain));
        assert!("later".parse::<ShutdownMode>().is_err());
    }
}
