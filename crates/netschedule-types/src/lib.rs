//! Wire vocabulary shared by the NetSchedule daemon and its admin client.
//!
//! The NetSchedule protocol is line oriented: every request is one text line
//! and every reply line starts with `OK:` or `ERR:`. This crate owns the
//! pieces both ends must agree on: the error code taxonomy, reply line
//! framing and the textual job key format.

mod error_code;
mod job_key;
mod reply;

pub use error_code::{ErrorCode, UnknownErrorCode};
pub use job_key::{JOB_KEY_PREFIX, JobKey, JobKeyParseError, JobRef};
pub use reply::{END_OF_LISTING, Reply, ReplyParseError};
