//! `HealthReporter` double that keeps every lifecycle call in order.

use std::sync::{Mutex, PoisonError};

use netschedule_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;

/// Lifecycle call seen by [`RecordingHealthReporter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    /// Rendered bootstrap error.
    BootstrapFailed(String),
    ListenerReady,
    /// Whether the shutdown was immediate.
    ShutdownStarted(bool),
    /// Connections still open when the server stopped.
    ShutdownCompleted(usize),
}

#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    log: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Snapshot of the calls so far.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, event: HealthEvent) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.push(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _: &Config) {
        self.push(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.push(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_ready(&self, _: &SocketEndpoint) {
        self.push(HealthEvent::ListenerReady);
    }

    fn shutdown_started(&self, immediate: bool) {
        self.push(HealthEvent::ShutdownStarted(immediate));
    }

    fn shutdown_completed(&self, lingering: usize) {
        self.push(HealthEvent::ShutdownCompleted(lingering));
    }
}
