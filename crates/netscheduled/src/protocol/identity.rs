//! Client identity established by the handshake.

use std::net::IpAddr;

use netschedule_config::{AccessMatrix, Config, QueueAccess, host_list_admits};
use netschedule_types::ErrorCode;

use super::arguments::{ArgKind, ArgumentSpec, bind, decode_value, tokenize};
use super::{CommandError, RoleMask};
use crate::queue::{ClientRecord, QueueService};

/// Declared arguments of the first handshake line.
pub const AUTH_SPEC: &[ArgumentSpec] = &[
    ArgumentSpec::required("client", ArgKind::Str),
    ArgumentSpec::ellipsis("params"),
];

/// Queue name synonymous with "no queue".
pub const NO_QUEUE: &str = "noname";

/// Server-side rules deciding which roles a client receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    admin_hosts: Vec<String>,
    admin_client_names: Vec<String>,
    dynamic_queue_admin_hosts: Vec<String>,
    queues: AccessMatrix,
}

impl AccessPolicy {
    /// Compiles the policy from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            admin_hosts: config.admin_hosts.clone(),
            admin_client_names: config.admin_client_names.clone(),
            dynamic_queue_admin_hosts: config.dynamic_queue_admin_hosts.clone(),
            queues: config.access_matrix(),
        }
    }

    /// Returns `true` when the client is on the administrator allow-list.
    #[must_use]
    pub fn is_admin(&self, peer: IpAddr, client_name: &str) -> bool {
        host_list_admits(&self.admin_hosts, peer)
            && self
                .admin_client_names
                .iter()
                .any(|name| name.eq_ignore_ascii_case(client_name))
    }

    /// Returns `true` when the peer may manage dynamic queues.
    #[must_use]
    pub fn is_dynamic_admin(&self, peer: IpAddr) -> bool {
        !self.dynamic_queue_admin_hosts.is_empty()
            && host_list_admits(&self.dynamic_queue_admin_hosts, peer)
    }

    /// Access rules of a queue.
    #[must_use]
    pub fn queue(&self, queue: &str) -> QueueAccess {
        self.queues.queue(queue)
    }
}

/// Who is on the other end of a connection, and what they may do.
///
/// Identities are values: binding to another queue produces a new identity
/// rather than changing this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Connection id.
    pub id: u64,
    /// Peer address.
    pub address: IpAddr,
    /// Client name from the handshake.
    pub client_name: String,
    /// Client node, when reported.
    pub client_node: String,
    /// Client session, when reported.
    pub client_session: String,
    /// Reported program and version, for example `blast 2.4.1`.
    pub program: Option<String>,
    /// Queue the identity is bound to.
    pub queue: Option<String>,
    /// Roles held.
    pub capabilities: RoleMask,
    /// Whether the queue admits the reported program.
    pub program_admitted: bool,
}

impl ClientIdentity {
    /// Parses the first handshake line into an unbound identity.
    ///
    /// # Errors
    ///
    /// Returns `eAuthenticationError` when the line lacks a client name or
    /// cannot be tokenised.
    pub fn authenticate(auth_line: &str, id: u64, address: IpAddr) -> Result<Self, CommandError> {
        let tokens = tokenize(auth_line);
        let params = bind(AUTH_SPEC, auth_line, &tokens)
            .map_err(|error| CommandError::new(ErrorCode::AuthenticationError, error.message()))?;
        let client_name = params.str("client").trim().to_owned();
        if client_name.is_empty() {
            return Err(CommandError::new(
                ErrorCode::AuthenticationError,
                "handshake carries no client name",
            ));
        }

        let mut identity = Self {
            id,
            address,
            client_name,
            client_node: String::new(),
            client_session: String::new(),
            program: None,
            queue: None,
            capabilities: RoleMask::empty(),
            program_admitted: true,
        };
        identity.scan_parameters(params.str("params"));
        Ok(identity)
    }

    fn scan_parameters(&mut self, blob: &str) {
        for token in tokenize(blob) {
            let (Some(name), Some(value)) = (token.name, decode_value(token.raw_value)) else {
                continue;
            };
            match name {
                "client_node" => self.client_node = value,
                "client_session" => self.client_session = value,
                "prog" => self.program = Some(value).filter(|program| !program.is_empty()),
                _ => {}
            }
        }
    }

    /// Returns a copy bound to `queue` (or unbound for `None`), with roles
    /// recomputed from `policy`.
    ///
    /// # Errors
    ///
    /// Returns `eUnknownQueue` when `queue` names no existing queue.
    pub fn bind(
        &self,
        queue: Option<&str>,
        policy: &AccessPolicy,
        queues: &dyn QueueService,
    ) -> Result<Self, CommandError> {
        let queue = queue
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != NO_QUEUE);
        let mut capabilities = RoleMask::empty();
        if policy.is_admin(self.address, &self.client_name) {
            capabilities |= RoleMask::ADMINISTRATOR;
        }
        if policy.is_dynamic_admin(self.address) {
            capabilities |= RoleMask::DYNAMIC_ADMINISTRATOR;
        }

        let mut program_admitted = true;
        if let Some(name) = queue {
            if !queues.has_queue(name) {
                return Err(CommandError::unknown_queue(format!(
                    "queue '{name}' does not exist"
                )));
            }
            let access = policy.queue(name);
            capabilities |= RoleMask::QUEUE;
            if access.admits_submitter(self.address) {
                capabilities |= RoleMask::SUBMITTER;
            }
            if access.admits_worker(self.address) {
                capabilities |= RoleMask::WORKER;
            }
            program_admitted = access.admits_program(self.program.as_deref());
        }

        Ok(Self {
            queue: queue.map(str::to_owned),
            capabilities,
            program_admitted,
            ..self.clone()
        })
    }

    /// Identifier used for worker affinities and the client registry.
    #[must_use]
    pub fn node(&self) -> String {
        if self.client_node.is_empty() {
            self.address.to_string()
        } else {
            self.client_node.clone()
        }
    }

    /// Registry entry describing this client.
    #[must_use]
    pub fn record(&self) -> ClientRecord {
        ClientRecord {
            node: self.node(),
            session: self.client_session.clone(),
            address: self.address.to_string(),
            program: self.program.clone().unwrap_or_default(),
            last_seen: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use netschedule_config::{AclRole, QueueAclDirective};
    use rstest::{fixture, rstest};

    use super::*;
    use crate::queue::MemoryQueueService;

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    const REMOTE: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));

    #[fixture]
    fn queues() -> MemoryQueueService {
        MemoryQueueService::new(["batch"], Vec::<String>::new())
    }

    fn policy(acls: Vec<QueueAclDirective>) -> AccessPolicy {
        AccessPolicy::from_config(&Config {
            admin_hosts: vec!["localhost".to_owned()],
            queue_acls: acls,
            ..Config::default()
        })
    }

    #[test]
    fn handshake_parameters_are_scanned_leniently() {
        let identity = ClientIdentity::authenticate(
            r#"worker1 client_node=node7 junk client_session=s1 prog="blast 2.4.1""#,
            1,
            REMOTE,
        )
        .expect("authenticate");
        assert_eq!(identity.client_name, "worker1");
        assert_eq!(identity.client_node, "node7");
        assert_eq!(identity.client_session, "s1");
        assert_eq!(identity.program.as_deref(), Some("blast 2.4.1"));
    }

    #[test]
    fn empty_handshake_is_rejected() {
        let error = ClientIdentity::authenticate("", 1, REMOTE).expect_err("must fail");
        assert_eq!(error.code(), ErrorCode::AuthenticationError);
    }

    #[rstest]
    #[case::empty("")]
    #[case::noname("noname")]
    fn noname_means_unbound(queues: MemoryQueueService, #[case] queue: &str) {
        let identity = ClientIdentity::authenticate("client", 1, REMOTE).expect("authenticate");
        let bound = identity
            .bind(Some(queue), &policy(Vec::new()), &queues)
            .expect("bind");
        assert_eq!(bound.queue, None);
        assert_eq!(bound.capabilities, RoleMask::empty());
    }

    #[rstest]
    fn queue_acls_select_roles(queues: MemoryQueueService) {
        let acls = vec![QueueAclDirective::new("batch", AclRole::Worker, ["10.9.9.9"])];
        let identity = ClientIdentity::authenticate("client", 1, REMOTE).expect("authenticate");
        let bound = identity
            .bind(Some("batch"), &policy(acls), &queues)
            .expect("bind");
        assert_eq!(bound.capabilities, RoleMask::QUEUE | RoleMask::SUBMITTER);
        assert_eq!(identity.capabilities, RoleMask::empty());
    }

    #[rstest]
    fn admins_receive_the_administrator_bundle(queues: MemoryQueueService) {
        let identity =
            ClientIdentity::authenticate("netschedule_admin", 1, LOOPBACK).expect("authenticate");
        let bound = identity.bind(None, &policy(Vec::new()), &queues).expect("bind");
        assert!(bound.capabilities.contains(RoleMask::ADMINISTRATOR));

        let remote = ClientIdentity { address: REMOTE, ..identity };
        let bound_remote = remote.bind(None, &policy(Vec::new()), &queues).expect("bind");
        assert!(!bound_remote.capabilities.contains(RoleMask::ADMIN));
    }

    #[rstest]
    fn unknown_queue_is_rejected(queues: MemoryQueueService) {
        let identity = ClientIdentity::authenticate("client", 1, REMOTE).expect("authenticate");
        let error = identity
            .bind(Some("missing"), &policy(Vec::new()), &queues)
            .expect_err("must fail");
        assert_eq!(error.code(), ErrorCode::UnknownQueue);
    }

    #[rstest]
    fn program_requirements_are_evaluated_on_bind(queues: MemoryQueueService) {
        let acls = vec![QueueAclDirective::new("batch", AclRole::Program, ["blast 2.0"])];
        let old = ClientIdentity::authenticate(r#"c prog="blast 1.9""#, 1, REMOTE)
            .expect("authenticate");
        let bound = old.bind(Some("batch"), &policy(acls), &queues).expect("bind");
        assert!(!bound.program_admitted);
    }
}
