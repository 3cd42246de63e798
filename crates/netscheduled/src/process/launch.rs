//! Supervises server launch and the shutdown sequence.

use std::sync::Arc;
use std::thread;

use tracing::info;

use crate::bootstrap::{ConfigLoader, RunningServer, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::server::ShutdownMode;

use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{PROCESS_TARGET, SHUTDOWN_TIMEOUT, SUPERVISOR_POLL};

/// Runs the server with the production collaborators until it is told to
/// stop by `SHUTDOWN`, a drain completing, or a termination signal.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap, signal registration or the
/// listener fails.
pub fn run_server() -> Result<(), LaunchError> {
    let mut signal = SystemShutdownSignal::install()?;
    let loader: Arc<dyn ConfigLoader> = Arc::new(SystemConfigLoader);
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    run_server_with(loader, reporter, &mut signal)
}

/// Runs the server with injected collaborators.
pub(crate) fn run_server_with(
    loader: Arc<dyn ConfigLoader>,
    reporter: Arc<dyn HealthReporter>,
    signal: &mut dyn ShutdownSignal,
) -> Result<(), LaunchError> {
    let server = bootstrap_with(loader, reporter)?;
    info!(
        target: PROCESS_TARGET,
        endpoint = %server.endpoint(),
        host = server.context().host(),
        "starting server runtime"
    );
    let running = server.start()?;
    supervise(&running, signal);
    let lingering = running.stop(SHUTDOWN_TIMEOUT)?;
    info!(
        target: PROCESS_TARGET,
        lingering,
        "shutdown sequence completed"
    );
    Ok(())
}

/// Blocks until the server should stop, turning signals into a normal
/// shutdown request.
pub(crate) fn supervise(running: &RunningServer, signal: &mut dyn ShutdownSignal) {
    let context = running.context();
    loop {
        if signal.triggered() {
            context.request_shutdown(ShutdownMode::Normal);
        }
        if context.should_stop() {
            return;
        }
        thread::sleep(SUPERVISOR_POLL);
    }
}
