//! Textual job keys.
//!
//! A job key names the server that owns the job and, optionally, the queue it
//! lives in: `JSID_01_<id>_<host>_<port>[_<queue>]`. Hosts never contain
//! underscores; queue names may, so everything after the port belongs to the
//! queue.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Prefix shared by every job key issued by this protocol version.
pub const JOB_KEY_PREFIX: &str = "JSID_01_";

/// Fully qualified job key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    /// Server-wide job identifier.
    pub id: u64,
    /// Host advertised by the issuing server.
    pub host: String,
    /// Port advertised by the issuing server.
    pub port: u16,
    /// Queue holding the job, when the key carries one.
    pub queue: Option<String>,
}

impl JobKey {
    /// Builds a key for a job in `queue`.
    #[must_use]
    pub fn new(id: u64, host: impl Into<String>, port: u16, queue: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            queue: Some(queue.into()),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{JOB_KEY_PREFIX}{}_{}_{}",
            self.id, self.host, self.port
        )?;
        if let Some(queue) = &self.queue {
            write!(formatter, "_{queue}")?;
        }
        Ok(())
    }
}

/// Errors raised while parsing job keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobKeyParseError {
    /// The key does not start with [`JOB_KEY_PREFIX`].
    #[error("job key '{0}' does not start with {JOB_KEY_PREFIX}")]
    MissingPrefix(String),
    /// A mandatory component is absent.
    #[error("job key '{key}' is missing its {component}")]
    MissingComponent {
        /// Offending key.
        key: String,
        /// Name of the absent component.
        component: &'static str,
    },
    /// The numeric id is not a positive integer.
    #[error("job key '{0}' has an invalid job id")]
    InvalidId(String),
    /// The port is not a valid TCP port.
    #[error("job key '{0}' has an invalid port")]
    InvalidPort(String),
}

impl FromStr for JobKey {
    type Err = JobKeyParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let rest = input
            .strip_prefix(JOB_KEY_PREFIX)
            .ok_or_else(|| JobKeyParseError::MissingPrefix(input.to_owned()))?;
        let mut parts = rest.splitn(4, '_');
        let missing = |component| JobKeyParseError::MissingComponent {
            key: input.to_owned(),
            component,
        };

        let id = parts
            .next()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| missing("id"))?
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| JobKeyParseError::InvalidId(input.to_owned()))?;
        let host = parts
            .next()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| missing("host"))?;
        let port = parts
            .next()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| missing("port"))?
            .parse::<u16>()
            .map_err(|_| JobKeyParseError::InvalidPort(input.to_owned()))?;
        let queue = parts
            .next()
            .filter(|part| !part.is_empty())
            .map(str::to_owned);

        Ok(Self {
            id,
            host: host.to_owned(),
            port,
            queue,
        })
    }
}

/// Job reference accepted by commands: a full key or a bare numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobRef {
    /// Fully qualified key.
    Key(JobKey),
    /// Bare id, resolved against the connection's queue.
    Id(u64),
}

impl JobRef {
    /// Returns the numeric job id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Key(key) => key.id,
            Self::Id(id) => *id,
        }
    }

    /// Returns the queue named by the reference, if any.
    #[must_use]
    pub fn queue(&self) -> Option<&str> {
        match self {
            Self::Key(key) => key.queue.as_deref(),
            Self::Id(_) => None,
        }
    }
}

impl FromStr for JobRef {
    type Err = JobKeyParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if !input.is_empty() && input.bytes().all(|byte| byte.is_ascii_digit()) {
            return input
                .parse::<u64>()
                .ok()
                .filter(|id| *id > 0)
                .map(Self::Id)
                .ok_or_else(|| JobKeyParseError::InvalidId(input.to_owned()));
        }
        input.parse().map(Self::Key)
    }
}
