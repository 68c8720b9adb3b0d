//! Async API for talking to the session actor.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::commands::SessionCommand;
use crate::torrent::connection::{ConnectionId, PeerConnection};
use crate::torrent::controller::{AddTorrentParams, TorrentStatus};
use crate::torrent::{FileIndex, InfoHash, PieceIndex, TorrentError};

/// Cloneable handle to a running session.
///
/// Every call is a message to the actor; the actor applies commands in
/// the order it receives them.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(sender: mpsc::Sender<SessionCommand>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, TorrentError>>) -> SessionCommand,
    ) -> Result<T, TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(build(responder))
            .await
            .map_err(|_| TorrentError::EngineShutdown)?;
        rx.await.map_err(|_| TorrentError::EngineShutdown)?
    }

    /// Adds a torrent and starts checking it.
    ///
    /// Without resume data in `params` the session's resume store is
    /// consulted.
    ///
    /// # Errors
    ///
    /// - `TorrentError::DuplicateTorrent` - If the torrent is already in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn add_torrent(&self, params: AddTorrentParams) -> Result<InfoHash, TorrentError> {
        self.request(|responder| SessionCommand::AddTorrent {
            params: Box::new(params),
            responder,
        })
        .await
    }

    /// Removes a torrent. With `delete_files` its data is deleted as well.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn remove_torrent(&self, info_hash: InfoHash, delete_files: bool) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::RemoveTorrent {
            info_hash,
            delete_files,
            responder,
        })
        .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn status(&self, info_hash: InfoHash) -> Result<TorrentStatus, TorrentError> {
        self.request(|responder| SessionCommand::GetStatus { info_hash, responder })
            .await
    }

    /// Status of every torrent in queue order.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn list_torrents(&self) -> Result<Vec<TorrentStatus>, TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::ListTorrents { responder })
            .await
            .map_err(|_| TorrentError::EngineShutdown)?;
        rx.await.map_err(|_| TorrentError::EngineShutdown)
    }

    /// Pauses a torrent and takes it out of the automatic queue.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn pause(&self, info_hash: InfoHash, graceful: bool) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::Pause {
            info_hash,
            graceful,
            responder,
        })
        .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn resume(&self, info_hash: InfoHash) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::Resume { info_hash, responder })
            .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::MetadataMissing` - If there is nothing to check yet
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn force_recheck(&self, info_hash: InfoHash) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::ForceRecheck { info_hash, responder })
            .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn set_auto_managed(&self, info_hash: InfoHash, auto_managed: bool) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::SetAutoManaged {
            info_hash,
            auto_managed,
            responder,
        })
        .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::InvalidFileIndex` - If the file is out of range
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn set_file_priority(
        &self,
        info_hash: InfoHash,
        file: FileIndex,
        priority: u8,
    ) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::SetFilePriority {
            info_hash,
            file,
            priority,
            responder,
        })
        .await
    }

    /// Requests `piece` ahead of everything else, due `deadline` from now.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::InvalidPieceIndex` - If the piece is out of range
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn set_piece_deadline(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        deadline: Duration,
        alert_when_available: bool,
    ) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::SetPieceDeadline {
            info_hash,
            piece,
            deadline,
            alert_when_available,
            responder,
        })
        .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn reset_piece_deadline(&self, info_hash: InfoHash, piece: PieceIndex) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::ResetPieceDeadline {
            info_hash,
            piece,
            responder,
        })
        .await
    }

    /// Returns false if the tracker was already known.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::InvalidTrackerUrl` - If the URL is not a tracker URL
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn add_tracker(&self, info_hash: InfoHash, url: &str, tier: u8) -> Result<bool, TorrentError> {
        self.request(|responder| SessionCommand::AddTracker {
            info_hash,
            url: url.to_string(),
            tier,
            responder,
        })
        .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn force_reannounce(
        &self,
        info_hash: InfoHash,
        after: Duration,
        url: Option<String>,
    ) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::ForceReannounce {
            info_hash,
            after,
            url,
            responder,
        })
        .await
    }

    /// Adds a peer address to the torrent's peer list. Returns false if
    /// it was rejected.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn connect_peer(&self, info_hash: InfoHash, peer: SocketAddr) -> Result<bool, TorrentError> {
        self.request(|responder| SessionCommand::ConnectPeer {
            info_hash,
            peer,
            responder,
        })
        .await
    }

    /// Hands an accepted incoming connection to its torrent.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::PeerRejected` - If the peer policy refused the connection
    /// - `TorrentError::InvalidState` - If the torrent is paused
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn attach_peer(
        &self,
        info_hash: InfoHash,
        connection: Box<dyn PeerConnection>,
    ) -> Result<ConnectionId, TorrentError> {
        self.request(|responder| SessionCommand::AttachPeer {
            info_hash,
            connection,
            responder,
        })
        .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::MetadataHashMismatch` - If the bytes don't match the info-hash
    /// - `TorrentError::InvalidMetadata` - If the dictionary can't be parsed
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn set_metadata(&self, info_hash: InfoHash, info: Bytes) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::SetMetadata {
            info_hash,
            info,
            responder,
        })
        .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::InvalidFileIndex` - If the file is out of range
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn rename_file(&self, info_hash: InfoHash, file: FileIndex, name: &str) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::RenameFile {
            info_hash,
            file,
            name: name.to_string(),
            responder,
        })
        .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn move_storage(&self, info_hash: InfoHash, path: PathBuf) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::MoveStorage {
            info_hash,
            path,
            responder,
        })
        .await
    }

    /// Starts writing resume data. The blob arrives as a `SaveResumeData`
    /// alert and is persisted to the session's resume store.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the torrent is not in the session
    /// - `TorrentError::EngineShutdown` - If the session has stopped
    pub async fn save_resume_data(&self, info_hash: InfoHash) -> Result<(), TorrentError> {
        self.request(|responder| SessionCommand::SaveResumeData { info_hash, responder })
            .await
    }

    /// Stops every torrent and the actor.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - If the session already stopped
    pub async fn shutdown(&self) -> Result<(), TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Shutdown { responder })
            .await
            .map_err(|_| TorrentError::EngineShutdown)?;
        rx.await.map_err(|_| TorrentError::EngineShutdown)
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}
