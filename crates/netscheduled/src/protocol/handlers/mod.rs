//! Command implementations, grouped by the role that runs them.

pub mod admin;
pub mod info;
pub mod queue;
pub mod submitter;
pub mod worker;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use netschedule_types::JobKey;

use super::arguments::Params;
use super::identity::ClientIdentity;
use super::session::{ProtocolServices, SessionState};
use super::CommandError;
use crate::queue::QueueService;
use crate::server::ServerContext;

/// Everything a handler may touch while running one command.
pub struct CommandContext<'a> {
    services: &'a ProtocolServices,
    /// Identity the command runs as; bound to the job key's queue when it
    /// differs from the connection's.
    pub identity: ClientIdentity,
    /// Connection state the command may change.
    pub state: &'a mut SessionState,
    /// Id of the request being served.
    pub request_id: u64,
}

impl<'a> CommandContext<'a> {
    /// Creates the context for one command.
    pub fn new(
        services: &'a ProtocolServices,
        identity: ClientIdentity,
        state: &'a mut SessionState,
        request_id: u64,
    ) -> Self {
        Self {
            services,
            identity,
            state,
            request_id,
        }
    }

    /// Shared server context.
    #[must_use]
    pub fn server(&self) -> &'a Arc<ServerContext> {
        &self.services.server
    }

    /// Queue service.
    #[must_use]
    pub fn queues(&self) -> &'a dyn QueueService {
        self.services.queues.as_ref()
    }

    /// Services the session runs with.
    #[must_use]
    pub fn services(&self) -> &'a ProtocolServices {
        self.services
    }

    /// Queue the command operates on.
    ///
    /// # Errors
    ///
    /// Returns `eUnknownQueue` when no queue is bound.
    pub fn queue(&self) -> Result<String, CommandError> {
        self.identity
            .queue
            .clone()
            .ok_or_else(|| CommandError::unknown_queue("no queue selected"))
    }

    /// Resolves the job id carried by argument `name`.
    ///
    /// # Errors
    ///
    /// Returns `eInvalidParameter` when the argument is absent.
    pub fn job_id(&self, params: &Params, name: &str) -> Result<u64, CommandError> {
        params
            .job(name)
            .map(|job| job.id())
            .ok_or_else(|| CommandError::invalid_parameter(format!("'{name}' names no job")))
    }

    /// Key under which job `id` of the bound queue is reported.
    ///
    /// # Errors
    ///
    /// Returns `eUnknownQueue` when no queue is bound.
    pub fn job_key(&self, id: u64) -> Result<JobKey, CommandError> {
        let server = self.server();
        Ok(JobKey::new(id, server.host(), server.port(), self.queue()?))
    }

    /// Clamps a client-requested wait to the configured maximum.
    #[must_use]
    pub fn wait(&self, seconds: i64) -> Duration {
        let requested = Duration::from_secs(u64::try_from(seconds).unwrap_or_default());
        requested.min(self.server().limits().max_wait)
    }

    /// Flag that interrupts blocking queue operations.
    #[must_use]
    pub fn cancel_flag(&self) -> &'a AtomicBool {
        self.services.server.shutdown_flag()
    }

    /// Refuses the command while submissions are disabled.
    ///
    /// # Errors
    ///
    /// Returns `eSubmitsDisabled` during drain or shutdown.
    pub fn ensure_submits_enabled(&self) -> Result<(), CommandError> {
        if self.server().submits_disabled() {
            return Err(CommandError::submits_disabled());
        }
        Ok(())
    }
}

/// Splits a list of affinity tokens separated by commas or spaces.
pub(crate) fn affinity_tokens(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\t'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Queue named by the job key in `params[name]`, when it carries one.
pub(crate) fn referenced_queue(params: &Params, name: &str) -> Option<String> {
    params
        .job(name)
        .and_then(|job| job.queue().map(str::to_owned))
}
