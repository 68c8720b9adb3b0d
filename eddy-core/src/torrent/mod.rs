//! Swarm coordination for a single torrent
//!
//! The [`controller::Torrent`] state machine composes the peer list policy
//! with the injected collaborators (disk, picker, tracker transport and
//! peer connections) defined in the sibling modules.

pub mod alerts;
pub mod connection;
pub mod controller;
pub mod disk;
pub mod layout;
pub mod peer_list;
pub mod picker;
pub mod resume;
pub mod resume_store;
pub mod time_critical;
pub mod tracker;

use std::fmt;

pub use alerts::{Alert, AlertSink};
pub use connection::{
    ConnectionFactory, ConnectionId, ConnectionKind, DisconnectReason, PeerConnection,
};
pub use controller::{AddTorrentParams, Collaborators, Torrent, TorrentStatus};
pub use disk::{DiskCompletion, DiskError, DiskErrorKind, DiskIo, DiskJob, JobId, JobStatus};
pub use layout::{FileEntry, TorrentLayout};
pub use peer_list::{PeerEndpoint, PeerHandle, PeerList, PeerListState, PeerSource, TorrentPeer};
pub use picker::{BlockPicker, BlockRef, PiecePicker};
pub use resume::ResumeData;
pub use resume_store::{FileResumeStore, MemoryResumeStore, ResumeStore};
pub use tracker::{AnnounceEntry, AnnounceEvent, TrackerList, TrackerRequest, TrackerResponse};

use serde::{Deserialize, Serialize};

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary. Used to identify torrents
/// across the swarm and to validate metadata and resume data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40 character hex string.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidInfoHash` - If the string is not 20 hex-encoded bytes
    pub fn from_hex(hex_str: &str) -> Result<Self, TorrentError> {
        let bytes = hex::decode(hex_str).map_err(|_| TorrentError::InvalidInfoHash {
            value: hex_str.to_string(),
        })?;
        let hash: [u8; 20] = bytes
            .try_into()
            .map_err(|_| TorrentError::InvalidInfoHash {
                value: hex_str.to_string(),
            })?;
        Ok(Self(hash))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the index as usize for slice access.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zero-based index of a file within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileIndex(pub u32);

impl fmt::Display for FileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TorrentState {
    CheckingResumeData,
    DownloadingMetadata,
    CheckingFiles,
    Downloading,
    Finished,
    Seeding,
    Error,
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TorrentState::CheckingResumeData => "checking resume data",
            TorrentState::DownloadingMetadata => "downloading metadata",
            TorrentState::CheckingFiles => "checking files",
            TorrentState::Downloading => "downloading",
            TorrentState::Finished => "finished",
            TorrentState::Seeding => "seeding",
            TorrentState::Error => "error",
        };
        f.write_str(name)
    }
}

/// User-visible reason a torrent is in the error state or paused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TorrentErrorCode {
    #[error("{0}")]
    Disk(DiskError),

    #[error("Torrent has no pieces")]
    InvalidPieceCount,

    #[error("Resume data version {found} is not supported")]
    UnsupportedResumeVersion { found: u32 },

    #[error("Metadata is invalid: {reason}")]
    InvalidMetadata { reason: String },

    #[error("SSL context could not be created: {reason}")]
    SslContext { reason: String },

    #[error("Filesystem error on file {file}: {reason}")]
    Filesystem { file: FileIndex, reason: String },
}

/// Errors that can occur during torrent operations.
///
/// Returned to API callers. Swarm-level failures (hash failures, tracker
/// errors, disk errors) never surface here; they become state transitions
/// and alerts instead.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Invalid info hash: {value}")]
    InvalidInfoHash { value: String },

    #[error("Piece {index} out of range (torrent has {num_pieces} pieces)")]
    InvalidPieceIndex { index: PieceIndex, num_pieces: u32 },

    #[error("File {index} out of range (torrent has {num_files} files)")]
    InvalidFileIndex { index: FileIndex, num_files: usize },

    #[error("Metadata does not match info hash {expected}")]
    MetadataHashMismatch { expected: InfoHash },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Piece {index} is not downloaded yet")]
    PieceNotAvailable { index: PieceIndex },

    #[error("Metadata is not available yet")]
    MetadataMissing,

    #[error("Torrent {info_hash} not found")]
    TorrentNotFound { info_hash: InfoHash },

    #[error("Torrent {info_hash} already added")]
    DuplicateTorrent { info_hash: InfoHash },

    #[error("Invalid tracker URL: {url}")]
    InvalidTrackerUrl { url: String },

    #[error("Resume data rejected: {reason}")]
    ResumeDataRejected { reason: String },

    #[error("Operation not allowed while {state}")]
    InvalidState { state: TorrentState },

    #[error("Peer {address} rejected")]
    PeerRejected { address: PeerEndpoint },

    #[error("Engine has shut down")]
    EngineShutdown,

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_display() {
        let hash = [
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
        ];
        let info_hash = InfoHash::new(hash);
        assert_eq!(
            info_hash.to_string(),
            "0123456789abcdef0123456789abcdef01234567"
        );
    }

    #[test]
    fn test_info_hash_hex_parsing() {
        let info_hash = InfoHash::new([0xab; 20]);
        let parsed = InfoHash::from_hex(&info_hash.to_string()).unwrap();
        assert_eq!(parsed, info_hash);

        assert!(InfoHash::from_hex("abcd").is_err());
        assert!(InfoHash::from_hex("zz").is_err());
    }

    #[test]
    fn test_piece_index_ordering() {
        let piece1 = PieceIndex::new(5);
        let piece2 = PieceIndex::new(10);
        assert!(piece1 < piece2);
        assert_eq!(piece1.as_u32(), 5);
        assert_eq!(piece2.as_usize(), 10);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TorrentState::CheckingFiles.to_string(), "checking files");
        assert_eq!(TorrentState::Seeding.to_string(), "seeding");
    }
}
