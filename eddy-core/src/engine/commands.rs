//! Commands accepted by the session actor.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::torrent::connection::{ConnectionId, PeerConnection};
use crate::torrent::controller::{AddTorrentParams, TorrentStatus};
use crate::torrent::{FileIndex, InfoHash, PieceIndex, TorrentError};

type Responder<T> = oneshot::Sender<Result<T, TorrentError>>;

/// Requests sent from a [`SessionHandle`](super::SessionHandle) to the
/// actor. Each carries a channel for the reply.
pub enum SessionCommand {
    AddTorrent {
        params: Box<AddTorrentParams>,
        responder: Responder<InfoHash>,
    },
    RemoveTorrent {
        info_hash: InfoHash,
        delete_files: bool,
        responder: Responder<()>,
    },
    GetStatus {
        info_hash: InfoHash,
        responder: Responder<TorrentStatus>,
    },
    ListTorrents {
        responder: oneshot::Sender<Vec<TorrentStatus>>,
    },
    Pause {
        info_hash: InfoHash,
        graceful: bool,
        responder: Responder<()>,
    },
    Resume {
        info_hash: InfoHash,
        responder: Responder<()>,
    },
    ForceRecheck {
        info_hash: InfoHash,
        responder: Responder<()>,
    },
    SetAutoManaged {
        info_hash: InfoHash,
        auto_managed: bool,
        responder: Responder<()>,
    },
    SetFilePriority {
        info_hash: InfoHash,
        file: FileIndex,
        priority: u8,
        responder: Responder<()>,
    },
    /// Deadline relative to the moment the actor handles the command.
    SetPieceDeadline {
        info_hash: InfoHash,
        piece: PieceIndex,
        deadline: Duration,
        alert_when_available: bool,
        responder: Responder<()>,
    },
    ResetPieceDeadline {
        info_hash: InfoHash,
        piece: PieceIndex,
        responder: Responder<()>,
    },
    AddTracker {
        info_hash: InfoHash,
        url: String,
        tier: u8,
        responder: Responder<bool>,
    },
    ForceReannounce {
        info_hash: InfoHash,
        after: Duration,
        url: Option<String>,
        responder: Responder<()>,
    },
    /// Adds an address to the peer list; the torrent connects on its own
    /// schedule.
    ConnectPeer {
        info_hash: InfoHash,
        peer: SocketAddr,
        responder: Responder<bool>,
    },
    AttachPeer {
        info_hash: InfoHash,
        connection: Box<dyn PeerConnection>,
        responder: Responder<ConnectionId>,
    },
    SetMetadata {
        info_hash: InfoHash,
        info: Bytes,
        responder: Responder<()>,
    },
    RenameFile {
        info_hash: InfoHash,
        file: FileIndex,
        name: String,
        responder: Responder<()>,
    },
    MoveStorage {
        info_hash: InfoHash,
        path: PathBuf,
        responder: Responder<()>,
    },
    SaveResumeData {
        info_hash: InfoHash,
        responder: Responder<()>,
    },
    Shutdown {
        responder: oneshot::Sender<()>,
    },
}
