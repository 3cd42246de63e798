use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Port NetSchedule servers listen on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 9100;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Host the admin client dials when the server listens on every interface.
pub const DEFAULT_CLIENT_HOST: &str = "127.0.0.1";

/// Client name granted administrative rights when no list is configured.
pub const DEFAULT_ADMIN_CLIENT: &str = "netschedule_admin";

/// Largest `BTCH size=` value accepted.
pub const DEFAULT_MAX_BATCH_SIZE: u32 = 10_000;

/// Largest decoded job input accepted, in bytes.
pub const DEFAULT_MAX_INPUT_SIZE: usize = 1024 * 1024;

/// Seconds a connection may stay silent before it is dropped.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Upper bound for the `WGET`/`READ` wait timeout, in seconds.
pub const DEFAULT_MAX_WAIT_SECS: u64 = 60;

/// Seconds a job may run before it is considered expired.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 3600;

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Endpoint the server binds to by default: every interface, standard port.
pub fn default_listen_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("0.0.0.0", DEFAULT_PORT)
}


/// Administrative client names used when none are configured.
pub fn default_admin_client_names() -> Vec<String> {
    vec![DEFAULT_ADMIN_CLIENT.to_owned()]
}
