//! Tests that exercise the crate's public re-exports.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use crate::{
    ConfigLoader, HealthReporter, ServerContext, ShutdownMode, StaticConfigLoader,
    StructuredHealthReporter, bootstrap_with,
};

use super::support::test_config;

#[rstest]
fn bootstrap_with_reexport_binds_an_ephemeral_port() {
    let loader: Arc<dyn ConfigLoader> = Arc::new(StaticConfigLoader::new(test_config()));
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());

    let server = bootstrap_with(loader, reporter).expect("bootstrap should succeed");

    assert_ne!(server.endpoint().port(), 0);
    assert_eq!(server.context().port(), server.endpoint().port());
    assert_eq!(server.context().host(), "nshost");
    assert_eq!(server.config().queues, vec!["batch".to_owned()]);
}

#[rstest]
fn running_server_reexport_reports_its_address() {
    let loader: Arc<dyn ConfigLoader> = Arc::new(StaticConfigLoader::new(test_config()));
    let running = bootstrap_with(loader, Arc::new(StructuredHealthReporter::new()))
        .expect("bootstrap should succeed")
        .start()
        .expect("listener should start");

    let addr = running.tcp_addr().expect("TCP address");
    assert!(addr.ip().is_loopback());

    running.context().request_shutdown(ShutdownMode::Now);
    assert_eq!(running.stop(Duration::from_secs(1)).expect("stop"), 0);
}

#[rstest]
fn server_context_reexport_builds_from_configuration() {
    let context = ServerContext::from_config(test_config());
    assert_eq!(context.host(), "nshost");
    assert_eq!(context.limits().max_batch_size, test_config().max_batch_size);
}
