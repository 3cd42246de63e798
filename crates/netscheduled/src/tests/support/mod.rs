//! Test harness utilities for the server bootstrap and protocol scenarios.

mod client;
mod config_loader;
mod reporter;
mod world;

pub use client::LineClient;
pub use config_loader::{failing_loader, test_config, test_loader, unix_loader};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use world::ServerWorld;

use std::cell::RefCell;

/// Creates a fresh scenario world.
#[must_use]
pub fn world() -> RefCell<ServerWorld> {
    RefCell::new(ServerWorld::new())
}
