//! Per-queue access control lists.
//!
//! Operators restrict who may submit to or pull jobs from a queue with
//! directives of the form `<queue>:<role>=<value>[,<value>...]`, for example
//! `batch:submit=10.0.0.5,10.0.0.6` or `batch:program=blast 2.1.0`. A queue
//! without directives for a role admits every peer for that role.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Role restricted by a directive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AclRole {
    /// Hosts allowed to submit jobs and read results.
    Submit,
    /// Hosts allowed to request and complete jobs.
    Worker,
    /// Client programs (optionally with a minimum version) admitted.
    Program,
}

/// Errors produced when parsing [`QueueAclDirective`] values.
#[derive(Debug, Error)]
pub enum QueueAclParseError {
    /// Queue separator (`:`) was missing from the directive.
    #[error("directive '{0}' is missing the queue separator ':'")]
    MissingQueue(String),
    /// Assignment (`=`) was missing from the directive.
    #[error("directive '{0}' is missing the assignment '='")]
    MissingAssignment(String),
    /// The role is not one of `submit`, `worker`, `program`.
    #[error("unsupported access role '{0}'")]
    InvalidRole(String),
    /// A program requirement carried a malformed version.
    #[error("invalid program version in '{0}'")]
    InvalidVersion(String),
}

/// Declarative access rule for one queue and role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct QueueAclDirective {
    /// Queue the rule applies to.
    pub queue: String,
    /// Restricted role.
    pub role: AclRole,
    /// Hosts or program requirements admitted for the role.
    pub values: Vec<String>,
}

impl QueueAclDirective {
    /// Creates a new directive.
    #[must_use]
    pub fn new<I, S>(queue: impl Into<String>, role: AclRole, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: queue.into(),
            role,
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for QueueAclDirective {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}:{}={}",
            self.queue,
            self.role,
            self.values.join(",")
        )
    }
}

impl FromStr for QueueAclDirective {
    type Err = QueueAclParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (queue, rest) = input
            .split_once(':')
            .ok_or_else(|| QueueAclParseError::MissingQueue(input.to_owned()))?;
        let (role, values) = rest
            .split_once('=')
            .ok_or_else(|| QueueAclParseError::MissingAssignment(input.to_owned()))?;
        let role = AclRole::from_str(role.trim())
            .map_err(|_| QueueAclParseError::InvalidRole(role.to_owned()))?;
        let values: Vec<String> = values
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .collect();
        if role == AclRole::Program {
            for value in &values {
                ProgramRequirement::from_str(value)?;
            }
        }
        Ok(Self::new(queue.trim(), role, values))
    }
}

/// Minimum program requirement: a name and an optional dotted version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRequirement {
    /// Program name as reported in the handshake.
    pub name: String,
    /// Lowest admitted version, when restricted.
    pub min_version: Option<Vec<u32>>,
}

impl ProgramRequirement {
    /// Returns `true` when `program` (for example `blast 2.4.1`) satisfies
    /// the requirement.
    #[must_use]
    pub fn admits(&self, program: &str) -> bool {
        let Ok(reported) = Self::from_str(program) else {
            return false;
        };
        if !reported.name.eq_ignore_ascii_case(&self.name) {
            return false;
        }
        match (&self.min_version, &reported.min_version) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(minimum), Some(actual)) => actual >= minimum,
        }
    }
}

impl FromStr for ProgramRequirement {
    type Err = QueueAclParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (name, version) = match trimmed.rsplit_once(' ') {
            Some((name, version)) => (name.trim(), Some(version)),
            None => (trimmed, None),
        };
        let min_version = version
            .map(|text| {
                text.split('.')
                    .map(str::parse::<u32>)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| QueueAclParseError::InvalidVersion(input.to_owned()))
            })
            .transpose()?;
        Ok(Self {
            name: name.to_owned(),
            min_version,
        })
    }
}

/// Access rules for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueAccess {
    /// Hosts admitted as submitters; empty admits everyone.
    pub submit_hosts: BTreeSet<String>,
    /// Hosts admitted as workers; empty admits everyone.
    pub worker_hosts: BTreeSet<String>,
    /// Programs admitted on the queue; empty admits every program.
    pub programs: Vec<ProgramRequirement>,
}

impl QueueAccess {
    /// Returns `true` when `peer` may submit jobs.
    #[must_use]
    pub fn admits_submitter(&self, peer: IpAddr) -> bool {
        host_list_admits(&self.submit_hosts, peer)
    }

    /// Returns `true` when `peer` may act as a worker node.
    #[must_use]
    pub fn admits_worker(&self, peer: IpAddr) -> bool {
        host_list_admits(&self.worker_hosts, peer)
    }

    /// Returns `true` when the reported client program is admitted.
    #[must_use]
    pub fn admits_program(&self, program: Option<&str>) -> bool {
        if self.programs.is_empty() {
            return true;
        }
        program.is_some_and(|reported| {
            self.programs
                .iter()
                .any(|requirement| requirement.admits(reported))
        })
    }
}

/// Access rules for every queue, keyed by normalised queue name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessMatrix {
    queues: BTreeMap<String, QueueAccess>,
}

impl AccessMatrix {
    /// Builds a matrix from directives; rules for the same queue and role
    /// accumulate.
    #[must_use]
    pub fn from_directives<'a, I>(directives: I) -> Self
    where
        I: IntoIterator<Item = &'a QueueAclDirective>,
    {
        let mut matrix = Self::default();
        for directive in directives {
            let entry = matrix
                .queues
                .entry(normalise_key(&directive.queue))
                .or_default();
            match directive.role {
                AclRole::Submit => entry
                    .submit_hosts
                    .extend(directive.values.iter().map(|host| normalise_key(host))),
                AclRole::Worker => entry
                    .worker_hosts
                    .extend(directive.values.iter().map(|host| normalise_key(host))),
                AclRole::Program => entry.programs.extend(
                    directive
                        .values
                        .iter()
                        .filter_map(|value| ProgramRequirement::from_str(value).ok()),
                ),
            }
        }
        matrix
    }

    /// Returns the rules for `queue`; unrestricted when none were declared.
    #[must_use]
    pub fn queue(&self, queue: &str) -> QueueAccess {
        self.queues
            .get(&normalise_key(queue))
            .cloned()
            .unwrap_or_default()
    }
}

/// Returns `true` when `peer` matches an entry of `hosts`, or the list is
/// empty. Entries are literal addresses, `*`, or `localhost` for loopback.
#[must_use]
pub fn host_list_admits<'a, I>(hosts: I, peer: IpAddr) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    let peer_text = peer.to_string();
    let mut empty = true;
    for host in hosts {
        empty = false;
        let host = host.trim();
        if host == "*"
            || host.eq_ignore_ascii_case(&peer_text)
            || (host.eq_ignore_ascii_case("localhost") && peer.is_loopback())
        {
            return true;
        }
    }
    empty
}

fn normalise_key(key: &str) -> String {
    key.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use rstest::rstest;

    const PEER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));

    #[test]
    fn parses_host_directive() {
        let directive: QueueAclDirective =
            "Batch:submit=10.0.0.5, 10.0.0.6".parse().expect("parse");
        assert_eq!(directive.queue, "Batch");
        assert_eq!(directive.role, AclRole::Submit);
        assert_eq!(directive.values, vec!["10.0.0.5", "10.0.0.6"]);
        assert_eq!(directive.to_string(), "Batch:submit=10.0.0.5,10.0.0.6");
    }

    #[rstest]
    #[case::no_queue("submit=host")]
    #[case::no_assignment("batch:submit")]
    #[case::bad_role("batch:reader=host")]
    #[case::bad_version("batch:program=blast 2.x")]
    fn rejects_malformed_directives(#[case] input: &str) {
        assert!(input.parse::<QueueAclDirective>().is_err(), "{input}");
    }

    #[test]
    fn unrestricted_queues_admit_everyone() {
        let matrix = AccessMatrix::default();
        let access = matrix.queue("anything");
        assert!(access.admits_submitter(PEER));
        assert!(access.admits_worker(PEER));
        assert!(access.admits_program(None));
    }

    #[test]
    fn host_rules_are_per_role() {
        let directives = [QueueAclDirective::new(
            "batch",
            AclRole::Worker,
            ["10.0.0.9"],
        )];
        let matrix = AccessMatrix::from_directives(&directives);
        let access = matrix.queue("BATCH");
        assert!(access.admits_submitter(PEER));
        assert!(!access.admits_worker(PEER));
    }

    #[test]
    fn localhost_entry_admits_loopback() {
        let hosts = vec!["localhost".to_owned()];
        assert!(host_list_admits(&hosts, IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(!host_list_admits(&hosts, PEER));
    }

    #[rstest]
    #[case::newer("blast 2.4.1", true)]
    #[case::equal("blast 2.1.0", true)]
    #[case::older("blast 2.0.9", false)]
    #[case::unversioned("blast", false)]
    #[case::other("megablast 9.0.0", false)]
    fn program_requirements_compare_versions(#[case] reported: &str, #[case] admitted: bool) {
        let requirement: ProgramRequirement = "blast 2.1.0".parse().expect("parse");
        assert_eq!(requirement.admits(reported), admitted);
    }
}
