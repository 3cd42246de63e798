//! Server bootstrap orchestration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use netschedule_config::{Config, SocketEndpoint, SocketPreparationError};

use crate::health::HealthReporter;
use crate::protocol::{ProtocolHandler, ProtocolServices};
use crate::queue::MemoryQueueService;
use crate::server::ServerContext;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::{ListenerError, ListenerHandle, SocketListener};

const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that always yields the same result.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    result: Result<Config, Arc<OrthoError>>,
}

impl StaticConfigLoader {
    /// Yields `config` on every load.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { result: Ok(config) }
    }

    /// Fails every load with `error`.
    #[must_use]
    pub fn failing(error: Arc<OrthoError>) -> Self {
        Self { result: Err(error) }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        self.result.clone()
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare server socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// The listen endpoint could not be bound.
    #[error("failed to bind listener: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
}

/// A bootstrapped server whose listener is bound but not yet accepting.
pub struct Server {
    config: Config,
    endpoint: SocketEndpoint,
    listener: SocketListener,
    services: ProtocolServices,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Server {
    /// Configuration the server started with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Endpoint actually bound; carries the real port when `0` was requested.
    #[must_use]
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Shared server context.
    #[must_use]
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.services.server
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Starts accepting connections.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the accept loop cannot start.
    pub fn start(self) -> Result<RunningServer, ListenerError> {
        let handler = Arc::new(ProtocolHandler::new(self.services.clone()));
        let handle = self.listener.start(handler)?;
        self.reporter.listener_ready(&self.endpoint);
        Ok(RunningServer {
            endpoint: self.endpoint,
            context: Arc::clone(&self.services.server),
            handle,
            reporter: self.reporter,
        })
    }
}

/// A server accepting connections.
pub struct RunningServer {
    endpoint: SocketEndpoint,
    context: Arc<ServerContext>,
    handle: ListenerHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl RunningServer {
    /// Endpoint clients connect to.
    #[must_use]
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// TCP address clients connect to, when serving TCP.
    #[must_use]
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            SocketEndpoint::Tcp { host, port } => format!("{host}:{port}").parse().ok(),
            SocketEndpoint::Unix { .. } => None,
        }
    }

    /// Shared server context.
    #[must_use]
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Stops accepting connections and waits up to `grace` for open ones to
    /// finish, unless the shutdown was immediate. Returns the number of
    /// connections still open.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] when the accept loop panicked.
    pub fn stop(self, grace: Duration) -> Result<usize, ListenerError> {
        let immediate = self.context.is_immediate();
        self.reporter.shutdown_started(immediate);
        self.handle.shutdown();
        self.handle.join()?;
        if !immediate {
            let deadline = Instant::now() + grace;
            while self.context.active_connections() > 0 && Instant::now() < deadline {
                thread::sleep(DRAIN_POLL);
            }
        }
        let lingering = self.context.active_connections();
        self.reporter.shutdown_completed(lingering);
        Ok(lingering)
    }
}

/// Bootstraps the server using the supplied collaborators.
///
/// The loader is kept for `RECO`, which reloads configuration at runtime.
///
/// # Errors
///
/// Returns [`BootstrapError`] naming the step that failed; the reporter is
/// told about the failure first.
pub fn bootstrap_with(
    loader: Arc<dyn ConfigLoader>,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Server, BootstrapError> {
    reporter.bootstrap_starting();
    let fail = |error: BootstrapError| {
        reporter.bootstrap_failed(&error);
        error
    };

    let config = loader
        .load()
        .map_err(|source| fail(BootstrapError::Configuration { source }))?;
    let telemetry = telemetry::initialise(&config)
        .map_err(|source| fail(BootstrapError::Telemetry { source }))?;
    config
        .listen()
        .prepare_filesystem()
        .map_err(|source| fail(BootstrapError::Socket { source }))?;
    let listener = SocketListener::bind(config.listen())
        .map_err(|source| fail(BootstrapError::Listener { source }))?;

    let endpoint = match (config.listen(), listener.local_addr()) {
        (SocketEndpoint::Tcp { host, .. }, Some(bound)) => SocketEndpoint::tcp(host, bound.port()),
        (endpoint, _) => endpoint.clone(),
    };
    let context = Arc::new(ServerContext::new(
        config.clone(),
        config.advertised_host(),
        endpoint.port(),
    ));
    let queues = Arc::new(MemoryQueueService::from_config(&config));
    let services = ProtocolServices::new(context, queues).with_reloader(loader);
    reporter.bootstrap_succeeded(&config);

    Ok(Server {
        config,
        endpoint,
        listener,
        services,
        telemetry,
        reporter,
    })
}
