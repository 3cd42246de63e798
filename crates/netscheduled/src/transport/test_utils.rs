//! Test helpers for the transport module.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{ConnectionHandler, ConnectionStream};

/// Handler recording the peer address of every accepted connection.
#[derive(Debug, Default)]
pub(crate) struct PeerRecorder {
    peers: Mutex<Vec<IpAddr>>,
}

impl PeerRecorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn peers(&self) -> Vec<IpAddr> {
        self.peers.lock().expect("peer list poisoned").clone()
    }

    /// Polls for up to two seconds until `expected` connections were seen.
    pub(crate) fn wait_for(&self, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self.peers().len() >= expected {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

impl ConnectionHandler for PeerRecorder {
    fn handle(&self, stream: ConnectionStream) {
        let peer = stream.peer_ip().expect("accepted stream has a peer");
        self.peers.lock().expect("peer list poisoned").push(peer);
    }
}
