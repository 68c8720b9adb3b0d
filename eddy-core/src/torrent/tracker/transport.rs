//! Announce transports used by the controller.
//!
//! All of them are fire-and-forget from the controller's point of view.
//! Replies come back to the session as [`TrackerEvent`](super::TrackerEvent)
//! and [`DhtEvent`] messages.

use std::net::SocketAddr;

use super::TrackerRequest;
use crate::torrent::InfoHash;

/// Sends HTTP/UDP tracker requests.
pub trait TrackerTransport: Send + Sync {
    fn queue_request(&self, request: TrackerRequest);
}

/// The session's DHT node.
pub trait DhtService: Send + Sync {
    fn is_running(&self) -> bool;
    /// Announces and looks up peers. `seed` suppresses peer lookup on
    /// implementations that support it.
    fn announce(&self, info_hash: InfoHash, listen_port: u16, seed: bool);
}

/// Local service discovery.
pub trait LsdService: Send + Sync {
    fn announce(&self, info_hash: InfoHash, listen_port: u16);
}

/// Peers found by a DHT lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtEvent {
    pub info_hash: InfoHash,
    pub peers: Vec<SocketAddr>,
}
