//! Peer connection interface used by the controller.
//!
//! The wire protocol lives elsewhere. The controller only sees this
//! uniform subset of operations, implemented by regular BitTorrent
//! connections as well as web seeds and HTTP seeds.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use super::peer_list::{PeerEndpoint, PeerHandle};
use super::picker::BlockRef;
use super::{InfoHash, PieceIndex, TorrentError};

/// Session-unique identifier of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Transport behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    BitTorrent,
    /// BEP 19 style web seed
    WebSeed,
    /// BEP 17 style HTTP seed
    HttpSeed,
}

/// Why a connection was closed by the swarm logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    DuplicatePeer,
    SelfConnection,
    PeerBanned,
    BannedByIpFilter,
    BannedByPortFilter,
    TooManyConnections,
    /// Both ends are seeds
    UploadToUpload,
    /// Share mode keeps seed count in check
    TooManySeeds,
    OutOfMemory,
    TorrentPaused,
    TorrentRemoved,
    HashFailure,
    Requested,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DisconnectReason::DuplicatePeer => "duplicate peer",
            DisconnectReason::SelfConnection => "connected to ourselves",
            DisconnectReason::PeerBanned => "peer is banned",
            DisconnectReason::BannedByIpFilter => "banned by IP filter",
            DisconnectReason::BannedByPortFilter => "banned by port filter",
            DisconnectReason::TooManyConnections => "too many connections",
            DisconnectReason::UploadToUpload => "both ends are seeding",
            DisconnectReason::TooManySeeds => "too many seeds",
            DisconnectReason::OutOfMemory => "out of memory",
            DisconnectReason::TorrentPaused => "torrent paused",
            DisconnectReason::TorrentRemoved => "torrent removed",
            DisconnectReason::HashFailure => "sent corrupt data",
            DisconnectReason::Requested => "disconnect requested",
        };
        f.write_str(reason)
    }
}

/// A block in a connection's request or download queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingBlock {
    pub block: BlockRef,
    /// The request exceeded its timeout but has not been cancelled
    pub timed_out: bool,
    /// The block was requested from another peer as well
    pub busy: bool,
}

/// Options for a block request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    pub time_critical: bool,
    /// Request a block already outstanding on another peer
    pub busy: bool,
}

/// Transfer counters of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub total_downloaded: u64,
    pub total_uploaded: u64,
    pub download_rate: u64,
    pub upload_rate: u64,
}

/// The operations the controller needs from a peer connection.
///
/// Calls are synchronous state updates. `disconnect` only marks the
/// connection closed; the controller removes it from its own tables in
/// the same call.
pub trait PeerConnection: Send {
    fn id(&self) -> ConnectionId;
    fn kind(&self) -> ConnectionKind;
    fn remote(&self) -> SocketAddr;
    fn local_endpoint(&self) -> SocketAddr;
    fn is_outgoing(&self) -> bool;

    /// Peer list entry this connection is attached to.
    fn peer(&self) -> Option<PeerHandle>;
    fn set_peer(&mut self, peer: Option<PeerHandle>);

    fn is_connecting(&self) -> bool;
    fn is_disconnecting(&self) -> bool;
    fn is_seed(&self) -> bool;
    fn is_peer_interested(&self) -> bool;
    fn in_share_mode(&self) -> bool;
    /// The attempt failed, counting against the peer's failcount
    fn failed(&self) -> bool;
    /// Reconnecting right away is allowed, keep last-connected unchanged
    fn fast_reconnect(&self) -> bool;

    fn has_piece(&self, piece: PieceIndex) -> bool;
    /// Pieces this peer announced, for availability bookkeeping.
    fn have_pieces(&self) -> Vec<PieceIndex>;

    /// Blocks requested and not yet received.
    fn download_queue(&self) -> Vec<PendingBlock>;
    /// Blocks queued but not yet sent as requests.
    fn request_queue(&self) -> Vec<PendingBlock>;
    /// Estimated time to drain the queue plus `extra_bytes`.
    fn download_queue_time(&self, extra_bytes: u32) -> Duration;
    /// False while choked or otherwise unable to take urgent requests.
    fn can_request_time_critical(&self) -> bool;

    /// Queues a block request. Returns false if the peer refused it.
    fn add_request(&mut self, block: BlockRef, flags: RequestFlags) -> bool;
    /// Moves a queued block to the front of the queue.
    fn make_time_critical(&mut self, block: BlockRef) -> bool;
    fn cancel_request(&mut self, block: BlockRef);
    /// Sends as many queued requests as the pipeline allows.
    fn send_block_requests(&mut self);

    fn announce_piece(&mut self, piece: PieceIndex);
    fn send_dont_have(&mut self, piece: PieceIndex);
    fn send_upload_only(&mut self, upload_only: bool);
    fn send_share_mode(&mut self, share_mode: bool);
    /// Re-evaluates whether we are interested in this peer.
    fn update_interest(&mut self);

    fn received_valid_data(&mut self, piece: PieceIndex);
    /// Returns false if the connection should be closed.
    fn received_invalid_data(&mut self, piece: PieceIndex, single_peer: bool) -> bool;

    fn disconnect(&mut self, reason: DisconnectReason);
    fn stats(&self) -> ConnectionStats;
}

/// Creates outgoing connections for the controller.
///
/// The returned connection starts in the connecting state and carries a
/// session-unique id; the transport reports the outcome to the engine
/// asynchronously.
pub trait ConnectionFactory: Send + Sync {
    /// # Errors
    ///
    /// - `TorrentError::PeerRejected` - If no connection can be opened to this endpoint
    fn connect(
        &self,
        info_hash: InfoHash,
        endpoint: &PeerEndpoint,
    ) -> Result<Box<dyn PeerConnection>, TorrentError>;
}
