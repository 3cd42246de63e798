//! Picks the server kind an administrative verb is addressed to.
//!
//! Each verb declares the targets that accept it. When only one target
//! accepts the verb it is used without any selector; otherwise the user's
//! explicit selectors must narrow the candidates to exactly one.

use std::fmt;

use thiserror::Error;

/// Kind of server `nsadmin` can talk to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// NetCache server.
    NetCache,
    /// NetSchedule server.
    NetSchedule,
    /// Worker node.
    WorkerNode,
}

impl Target {
    /// Every target, in flag order.
    pub const ALL: [Self; 3] = [Self::NetCache, Self::NetSchedule, Self::WorkerNode];

    /// Command-line flag selecting the target.
    #[must_use]
    pub const fn flag(self) -> &'static str {
        match self {
            Self::NetCache => "--netcache",
            Self::NetSchedule => "--netschedule",
            Self::WorkerNode => "--workernode",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NetCache => "NetCache",
            Self::NetSchedule => "NetSchedule",
            Self::WorkerNode => "worker node",
        };
        formatter.write_str(name)
    }
}

/// Target selectors the user set on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// `--netcache` was given.
    pub netcache: bool,
    /// `--netschedule` was given.
    pub netschedule: bool,
    /// `--workernode` was given.
    pub workernode: bool,
}

impl Selection {
    /// Returns `true` when the selector for `target` was given.
    #[must_use]
    pub const fn selects(self, target: Target) -> bool {
        match target {
            Target::NetCache => self.netcache,
            Target::NetSchedule => self.netschedule,
            Target::WorkerNode => self.workernode,
        }
    }

    fn selected(self) -> impl Iterator<Item = Target> {
        Target::ALL
            .into_iter()
            .filter(move |target| self.selects(*target))
    }
}

/// Target selection failed; reported as a usage error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A selector names a target that does not accept the verb.
    #[error("'{verb}' does not apply to {flag}; use {valid}")]
    NotAccepted {
        /// Verb being resolved.
        verb: String,
        /// Offending selector.
        flag: &'static str,
        /// Selectors that would be accepted.
        valid: String,
    },
    /// Several targets accept the verb and none was selected.
    #[error("'{verb}' needs one of {valid}")]
    Ambiguous {
        /// Verb being resolved.
        verb: String,
        /// Selectors to choose from.
        valid: String,
    },
    /// Several accepted targets were selected at once.
    #[error("'{verb}' accepts only one of {valid}")]
    Conflicting {
        /// Verb being resolved.
        verb: String,
        /// Selectors to choose from.
        valid: String,
    },
}

/// Resolves the target of `verb` from the targets that `accepted` it and the
/// user's `explicit` selection.
///
/// # Errors
///
/// Returns [`ResolveError`] when a selector names a target outside
/// `accepted`, or when the selection does not single out one target.
pub fn resolve(
    verb: &str,
    accepted: &[Target],
    explicit: Selection,
) -> Result<Target, ResolveError> {
    let valid = || {
        accepted
            .iter()
            .map(|target| target.flag())
            .collect::<Vec<_>>()
            .join(", ")
    };

    if let Some(rejected) = explicit
        .selected()
        .find(|target| !accepted.contains(target))
    {
        return Err(ResolveError::NotAccepted {
            verb: verb.to_owned(),
            flag: rejected.flag(),
            valid: valid(),
        });
    }

    if let [only] = accepted {
        return Ok(*only);
    }

    let chosen: Vec<Target> = accepted
        .iter()
        .copied()
        .filter(|target| explicit.selects(*target))
        .collect();
    match chosen.as_slice() {
        [target] => Ok(*target),
        [] => Err(ResolveError::Ambiguous {
            verb: verb.to_owned(),
            valid: valid(),
        }),
        _ => Err(ResolveError::Conflicting {
            verb: verb.to_owned(),
            valid: valid(),
        }),
    }
}
