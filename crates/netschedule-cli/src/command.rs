//! Translation of verbs into protocol requests.

use std::io::{Read, Write};

use crate::AppError;
use crate::cli::{Cli, ShutdownArgs, Verb};
use crate::output::{Payload, decode_payload};
use crate::resolver::{Selection, Target, resolve};
use crate::transport::LineChannel;

/// Commands whose replies are `OK:END`-terminated listings.
const LISTING_COMMANDS: &[&str] = &["STAT", "GETSTAT", "HEALTH", "GETCONF", "DUMP", "AFLS"];

const ANY_TARGET: &[Target] = &Target::ALL;
const SCHEDULER_ONLY: &[Target] = &[Target::NetSchedule];
const CACHE_OR_SCHEDULER: &[Target] = &[Target::NetCache, Target::NetSchedule];

/// Targets that accept `verb`.
pub(crate) const fn accepted_targets(verb: &Verb) -> &'static [Target] {
    match verb {
        Verb::Serverinfo | Verb::Stats | Verb::Getconf | Verb::Shutdown(_) => ANY_TARGET,
        Verb::Health | Verb::Drain => SCHEDULER_ONLY,
        Verb::Reconf | Verb::Exec { .. } => CACHE_OR_SCHEDULER,
    }
}

/// What to send once the session is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    /// One command, one `OK:` line back.
    Single(String),
    /// One command answered by a listing.
    Listing(String),
    /// `QLST`, then `QINF` per queue, keeping queues of the given class.
    QueueClass(String),
}

/// A resolved invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Plan {
    pub(crate) target: Target,
    pub(crate) queue: Option<String>,
    pub(crate) request: Request,
}

impl Plan {
    /// Resolves the target and request for a parsed command line.
    pub(crate) fn from_cli(cli: &Cli) -> Result<Self, AppError> {
        let selection = Selection {
            netcache: cli.netcache,
            netschedule: cli.netschedule,
            workernode: cli.workernode,
        };
        let target = resolve(cli.verb.name(), accepted_targets(&cli.verb), selection)?;

        if let Some(class) = cli.queue_class.as_deref() {
            if cli.verb != Verb::Serverinfo {
                return Err(AppError::QueueClassMisuse);
            }
            return Ok(Self {
                target,
                queue: None,
                request: Request::QueueClass(class.to_owned()),
            });
        }

        let request = match &cli.verb {
            Verb::Serverinfo => match cli.queue.as_deref() {
                Some(queue) => Request::Single(format!("QINF2 qname={queue}")),
                None => Request::Single("VERSION".to_owned()),
            },
            Verb::Stats if target == Target::NetCache => Request::Listing("GETSTAT".to_owned()),
            Verb::Stats => Request::Listing("STAT".to_owned()),
            Verb::Health => Request::Listing("HEALTH".to_owned()),
            Verb::Getconf => Request::Listing("GETCONF".to_owned()),
            Verb::Reconf if target == Target::NetCache => Request::Single("RECONF".to_owned()),
            Verb::Reconf => Request::Single("RECO".to_owned()),
            Verb::Drain => Request::Single("SHUTDOWN mode=drain".to_owned()),
            Verb::Shutdown(args) => {
                Request::Single(format!("SHUTDOWN mode={}", shutdown_mode(*args)))
            }
            Verb::Exec { command } => raw_request(command.join(" ")),
        };
        Ok(Self {
            target,
            queue: cli.queue.clone(),
            request,
        })
    }

    /// Runs the request over an open session.
    pub(crate) fn execute<S: Read + Write>(
        &self,
        channel: &mut LineChannel<S>,
    ) -> Result<Payload, AppError> {
        match &self.request {
            Request::Single(line) => channel.request(line).map(Payload::Single),
            Request::Listing(line) => channel.listing(line).map(Payload::Listing),
            Request::QueueClass(class) => describe_class(channel, class).map(Payload::Listing),
        }
    }
}

const fn shutdown_mode(args: ShutdownArgs) -> &'static str {
    if args.die {
        "die"
    } else if args.now {
        "now"
    } else if args.drain {
        "drain"
    } else {
        "normal"
    }
}

fn raw_request(line: String) -> Request {
    let command = line
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if LISTING_COMMANDS.contains(&command.as_str()) {
        Request::Listing(line)
    } else {
        Request::Single(line)
    }
}

fn describe_class<S: Read + Write>(
    channel: &mut LineChannel<S>,
    class: &str,
) -> Result<Vec<String>, AppError> {
    let queues = channel.request("QLST")?;
    let mut described = Vec::new();
    for queue in queues.split(';').filter(|name| !name.is_empty()) {
        let info = channel.request(&format!("QINF qname={queue}"))?;
        let in_class = decode_payload(&info)
            .get("class")
            .and_then(|value| value.as_str())
            .is_some_and(|value| value == class);
        if in_class {
            described.push(format!("queue={queue}&{info}"));
        }
    }
    Ok(described)
}
