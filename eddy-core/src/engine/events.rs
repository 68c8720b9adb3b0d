//! Asynchronous events delivered to the session actor.
//!
//! Disk, tracker, DHT and peer transports run outside the actor. They hand
//! their results back through an [`EventSender`], and the actor routes each
//! event to the owning torrent on its own task.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::torrent::connection::ConnectionId;
use crate::torrent::disk::DiskCompletion;
use crate::torrent::picker::BlockRef;
use crate::torrent::tracker::{DhtEvent, TrackerEvent};
use crate::torrent::{InfoHash, PieceIndex};

/// Something a peer connection reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Have { piece: PieceIndex },
    /// The peer has every piece
    Seed,
    Block { block: BlockRef, data: Bytes },
    ListenPort { port: u16 },
    Disconnected,
}

/// Event routed to a torrent by the session actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Disk(DiskCompletion),
    Tracker(TrackerEvent),
    Dht(DhtEvent),
    LocalPeer {
        info_hash: InfoHash,
        peer: SocketAddr,
    },
    Peer {
        info_hash: InfoHash,
        connection: ConnectionId,
        event: PeerEvent,
    },
}

impl SessionEvent {
    pub fn info_hash(&self) -> InfoHash {
        match self {
            SessionEvent::Disk(completion) => completion.info_hash,
            SessionEvent::Tracker(event) => event.info_hash,
            SessionEvent::Dht(event) => event.info_hash,
            SessionEvent::LocalPeer { info_hash, .. } | SessionEvent::Peer { info_hash, .. } => *info_hash,
        }
    }
}

/// Cloneable sending half handed to transports.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

/// Receiving half consumed by the session actor.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

impl EventSender {
    /// Creates a connected sender and receiver.
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Returns false once the session is gone.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn disk_completed(&self, completion: DiskCompletion) -> bool {
        self.send(SessionEvent::Disk(completion))
    }

    pub fn tracker_replied(&self, event: TrackerEvent) -> bool {
        self.send(SessionEvent::Tracker(event))
    }

    pub fn peer_event(&self, info_hash: InfoHash, connection: ConnectionId, event: PeerEvent) -> bool {
        self.send(SessionEvent::Peer {
            info_hash,
            connection,
            event,
        })
    }
}
