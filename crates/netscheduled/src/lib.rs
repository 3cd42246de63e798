//! The NetSchedule job broker server.
//!
//! Clients connect over TCP, identify themselves, pick a queue and then send
//! one text command per line: submitters add jobs and read results, workers
//! lease jobs and report outcomes, administrators inspect and stop the
//! server. The [`protocol`] module holds the per-connection state machine,
//! the command tables and the handlers; [`queue`] holds the job store they
//! drive.
//!
//! Start-up follows a fixed sequence. Configuration is loaded through
//! [`ortho_config`], the `tracing` subscriber is installed, the listen socket
//! is bound, and only then does the listener begin accepting connections.
//! Health reporting hooks emit structured events at each stage so operators
//! can see which step failed.
//!
//! ## Shutdown
//!
//! `SHUTDOWN` and termination signals set flags on the shared
//! [`ServerContext`]. The supervisor polls them, stops the listener and gives
//! open connections a grace period unless the shutdown was immediate. A
//! drain refuses new submitters and turns into a normal shutdown once the
//! last open batch session has ended.

mod bootstrap;
mod health;
mod process;
pub mod protocol;
pub mod queue;
pub mod server;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, RunningServer, Server, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_server};
pub use server::{Limits, ServerContext, ShutdownMode};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
