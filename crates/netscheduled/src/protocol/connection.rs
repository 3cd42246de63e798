//! Glue between accepted sockets and protocol sessions.

use std::io::BufReader;
use std::time::Duration;

use tracing::{info, warn};

use super::PROTOCOL_TARGET;
use super::session::{ProtocolServices, Session};
use crate::transport::{ConnectionHandler, ConnectionStream};

/// Serves every accepted connection with a [`Session`].
#[derive(Debug, Clone)]
pub struct ProtocolHandler {
    services: ProtocolServices,
}

impl ProtocolHandler {
    /// Creates a handler sharing `services` between connections.
    #[must_use]
    pub fn new(services: ProtocolServices) -> Self {
        Self { services }
    }
}

impl ConnectionHandler for ProtocolHandler {
    fn handle(&self, stream: ConnectionStream) {
        let _guard = self.services.server.connection_opened();
        let peer = match stream.peer_ip() {
            Ok(peer) => peer,
            Err(error) => {
                warn!(target: PROTOCOL_TARGET, %error, "peer address unavailable");
                return;
            }
        };
        let idle = self.services.server.config().idle_timeout_secs;
        let timeout = (idle > 0).then(|| Duration::from_secs(idle));
        if let Err(error) = stream.set_read_timeout(timeout) {
            warn!(target: PROTOCOL_TARGET, %peer, %error, "cannot set idle timeout");
            return;
        }
        let reader = match stream.try_clone() {
            Ok(reader) => BufReader::new(reader),
            Err(error) => {
                warn!(target: PROTOCOL_TARGET, %peer, %error, "cannot split connection");
                return;
            }
        };

        let session = Session::new(self.services.clone(), peer, reader, stream);
        let connection_id = session.connection_id();
        info!(target: PROTOCOL_TARGET, connection_id, %peer, "connection opened");
        let reason = session.run();
        info!(target: PROTOCOL_TARGET, connection_id, %peer, ?reason, "connection closed");
    }
}
