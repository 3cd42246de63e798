//! Shared configuration for the NetSchedule server and admin client.
//!
//! Values are layered by `ortho_config`: built-in defaults, then the TOML
//! file named by `--config-path` or `NETSCHEDULE_CONFIG_PATH`, then
//! `NETSCHEDULE_*` environment variables, then command-line flags.

mod access;
mod defaults;
mod logging;
mod socket;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use access::{
    AccessMatrix, AclRole, ProgramRequirement, QueueAccess, QueueAclDirective, QueueAclParseError,
    host_list_admits,
};
pub use defaults::{
    DEFAULT_ADMIN_CLIENT, DEFAULT_CLIENT_HOST, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_INPUT_SIZE, DEFAULT_MAX_WAIT_SECS, DEFAULT_PORT,
    DEFAULT_RUN_TIMEOUT_SECS,
    default_admin_client_names, default_listen_endpoint, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Runtime configuration shared by `netscheduled` and `nsadmin`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[ortho_config(prefix = "NETSCHEDULE")]
pub struct Config {
    /// Endpoint the server listens on, and the admin client's default target.
    #[ortho_config(default = default_listen_endpoint())]
    pub listen: SocketEndpoint,
    /// Host name advertised in job keys; the listen host when unset.
    #[serde(default)]
    pub advertised_host: Option<String>,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Peer addresses granted administrative roles.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub admin_hosts: Vec<String>,
    /// Client names granted administrative roles.
    #[ortho_config(default = default_admin_client_names(), merge_strategy = "append")]
    pub admin_client_names: Vec<String>,
    /// Peer addresses allowed to create dynamic queues and queue classes.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub dynamic_queue_admin_hosts: Vec<String>,
    /// Statically configured queues.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub queues: Vec<String>,
    /// Queue classes dynamic queues may be created from.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub queue_classes: Vec<String>,
    /// Per-queue access directives such as `batch:submit=10.0.0.5`.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub queue_acls: Vec<QueueAclDirective>,
    /// Largest job count accepted in one `BTCH` block.
    #[ortho_config(default = DEFAULT_MAX_BATCH_SIZE)]
    pub max_batch_size: u32,
    /// Largest decoded job input in bytes.
    #[ortho_config(default = DEFAULT_MAX_INPUT_SIZE)]
    pub max_input_size: usize,
    /// Seconds of client silence tolerated before disconnecting.
    #[ortho_config(default = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout_secs: u64,
    /// Upper bound for client-requested wait timeouts.
    #[ortho_config(default = DEFAULT_MAX_WAIT_SECS)]
    pub max_wait_secs: u64,
    /// Seconds a running job may hold its lease.
    #[ortho_config(default = DEFAULT_RUN_TIMEOUT_SECS)]
    pub run_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_endpoint(),
            advertised_host: None,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            admin_hosts: Vec::new(),
            admin_client_names: default_admin_client_names(),
            dynamic_queue_admin_hosts: Vec::new(),
            queues: Vec::new(),
            queue_classes: Vec::new(),
            queue_acls: Vec::new(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            max_wait_secs: DEFAULT_MAX_WAIT_SECS,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Endpoint the server binds to.
    #[must_use]
    pub fn listen(&self) -> &SocketEndpoint {
        &self.listen
    }

    /// Returns the configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the configured log format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Host name written into job keys and batch replies.
    #[must_use]
    pub fn advertised_host(&self) -> String {
        if let Some(host) = self.advertised_host.as_deref().filter(|h| !h.is_empty()) {
            return host.to_owned();
        }
        match &self.listen {
            SocketEndpoint::Tcp { host, .. } if host != "0.0.0.0" && host != "::" => host.clone(),
            _ => "localhost".to_owned(),
        }
    }

    /// Compiles the queue ACL directives.
    #[must_use]
    pub fn access_matrix(&self) -> AccessMatrix {
        AccessMatrix::from_directives(&self.queue_acls)
    }
}
