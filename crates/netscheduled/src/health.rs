//! Lifecycle events for operators.
//!
//! Bootstrap, listener readiness and shutdown are reported through
//! [`HealthReporter`] so tests can record them and production can log them
//! under the `netscheduled::health` target.

use netschedule_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Receives server lifecycle events.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the listener accepts connections.
    fn listener_ready(&self, endpoint: &SocketEndpoint);

    /// Invoked when the supervisor begins shutting the server down.
    fn shutdown_started(&self, immediate: bool);

    /// Invoked after the listener has stopped.
    fn shutdown_completed(&self, lingering_connections: usize);
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "loading configuration"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            listen = %config.listen(),
            advertised_host = %config.advertised_host(),
            static_queues = config.queues.len(),
            queue_classes = config.queue_classes.len(),
            admin_hosts = config.admin_hosts.len(),
            "configuration loaded and socket bound"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "server bootstrap failed"
        );
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_ready",
            %endpoint,
            "accepting NetSchedule clients"
        );
    }

    fn shutdown_started(&self, immediate: bool) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_started",
            immediate,
            "stopping listener"
        );
    }

    fn shutdown_completed(&self, lingering_connections: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_completed",
            lingering_connections,
            "listener stopped"
        );
    }
}
