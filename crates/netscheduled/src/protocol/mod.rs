//! The NetSchedule line protocol.
//!
//! A connection starts with a two-line handshake (client identification,
//! then queue name) and continues with one command per line. Commands are
//! looked up in static tables, authorised against the client's roles, bound
//! to typed arguments and executed against the [`crate::queue::QueueService`].
//! Handlers whose reply announces a queue mutation return an undo value that
//! is applied when the reply cannot be written.

pub mod arguments;
pub mod batch;
mod connection;
pub mod dispatch;
mod errors;
pub mod handlers;
pub mod identity;
pub mod response;
mod roles;
pub mod rollback;
pub mod session;
pub mod table;

pub use connection::ProtocolHandler;
pub use errors::CommandError;
pub use identity::{AccessPolicy, ClientIdentity};
pub use roles::RoleMask;
pub use session::{CloseReason, ProtocolServices, Session};

pub(crate) const PROTOCOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::protocol");
