//! Notifications published by torrents.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::disk::DiskError;
use super::peer_list::PeerEndpoint;
use super::resume::ResumeData;
use super::tracker::AnnounceEvent;
use super::{FileIndex, InfoHash, PieceIndex, TorrentErrorCode, TorrentState};

/// Events a torrent reports to the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    TorrentAdded { info_hash: InfoHash },
    TorrentRemoved { info_hash: InfoHash },
    StateChanged {
        info_hash: InfoHash,
        previous: TorrentState,
        state: TorrentState,
    },
    TorrentPaused { info_hash: InfoHash },
    TorrentResumed { info_hash: InfoHash },
    TorrentChecked { info_hash: InfoHash },
    TorrentFinished { info_hash: InfoHash },
    TorrentError {
        info_hash: InfoHash,
        error: TorrentErrorCode,
    },
    PieceFinished { info_hash: InfoHash, piece: PieceIndex },
    HashFailed { info_hash: InfoHash, piece: PieceIndex },
    PeerBanned {
        info_hash: InfoHash,
        endpoint: PeerEndpoint,
    },
    UploadModeChanged { info_hash: InfoHash, upload_mode: bool },
    FileError { info_hash: InfoHash, error: DiskError },
    TrackerAnnounce {
        info_hash: InfoHash,
        url: String,
        event: AnnounceEvent,
    },
    TrackerReply {
        info_hash: InfoHash,
        url: String,
        num_peers: usize,
    },
    TrackerWarning {
        info_hash: InfoHash,
        url: String,
        message: String,
    },
    TrackerError {
        info_hash: InfoHash,
        url: String,
        times_in_row: u32,
        status_code: Option<u16>,
        message: String,
    },
    ScrapeReply {
        info_hash: InfoHash,
        url: String,
        complete: i32,
        incomplete: i32,
    },
    DhtReply { info_hash: InfoHash, num_peers: usize },
    FastresumeRejected { info_hash: InfoHash, reason: String },
    SaveResumeData {
        info_hash: InfoHash,
        resume: Box<ResumeData>,
    },
    SaveResumeDataFailed { info_hash: InfoHash, error: DiskError },
    FileRenamed {
        info_hash: InfoHash,
        file: FileIndex,
        name: String,
    },
    FileRenameFailed {
        info_hash: InfoHash,
        file: FileIndex,
        error: DiskError,
    },
    StorageMoved { info_hash: InfoHash, path: PathBuf },
    StorageMoveFailed { info_hash: InfoHash, error: DiskError },
    FilesDeleted { info_hash: InfoHash },
    FileDeleteFailed { info_hash: InfoHash, error: DiskError },
    MetadataReceived { info_hash: InfoHash },
    MetadataFailed { info_hash: InfoHash, reason: String },
    ReadPiece {
        info_hash: InfoHash,
        piece: PieceIndex,
        data: Bytes,
    },
    ReadPieceFailed {
        info_hash: InfoHash,
        piece: PieceIndex,
        error: DiskError,
    },
}

impl Alert {
    /// The torrent the alert is about.
    pub fn info_hash(&self) -> InfoHash {
        match self {
            Alert::TorrentAdded { info_hash }
            | Alert::TorrentRemoved { info_hash }
            | Alert::StateChanged { info_hash, .. }
            | Alert::TorrentPaused { info_hash }
            | Alert::TorrentResumed { info_hash }
            | Alert::TorrentChecked { info_hash }
            | Alert::TorrentFinished { info_hash }
            | Alert::TorrentError { info_hash, .. }
            | Alert::PieceFinished { info_hash, .. }
            | Alert::HashFailed { info_hash, .. }
            | Alert::PeerBanned { info_hash, .. }
            | Alert::UploadModeChanged { info_hash, .. }
            | Alert::FileError { info_hash, .. }
            | Alert::TrackerAnnounce { info_hash, .. }
            | Alert::TrackerReply { info_hash, .. }
            | Alert::TrackerWarning { info_hash, .. }
            | Alert::TrackerError { info_hash, .. }
            | Alert::ScrapeReply { info_hash, .. }
            | Alert::DhtReply { info_hash, .. }
            | Alert::FastresumeRejected { info_hash, .. }
            | Alert::SaveResumeData { info_hash, .. }
            | Alert::SaveResumeDataFailed { info_hash, .. }
            | Alert::FileRenamed { info_hash, .. }
            | Alert::FileRenameFailed { info_hash, .. }
            | Alert::StorageMoved { info_hash, .. }
            | Alert::StorageMoveFailed { info_hash, .. }
            | Alert::FilesDeleted { info_hash }
            | Alert::FileDeleteFailed { info_hash, .. }
            | Alert::MetadataReceived { info_hash }
            | Alert::MetadataFailed { info_hash, .. }
            | Alert::ReadPiece { info_hash, .. }
            | Alert::ReadPieceFailed { info_hash, .. } => *info_hash,
        }
    }
}

/// Sending half of the alert channel.
///
/// Posting never blocks. Alerts are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct AlertSink {
    sender: Option<mpsc::UnboundedSender<Alert>>,
}

impl AlertSink {
    /// Creates a connected sink and its receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A sink that discards every alert.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn post(&self, alert: Alert) {
        if let Some(sender) = &self.sender {
            if sender.send(alert).is_err() {
                tracing::trace!("Alert receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_alert_sink_delivers_in_order() {
        let (sink, mut receiver) = AlertSink::channel();
        let info_hash = InfoHash::new([1; 20]);
        sink.post(Alert::TorrentAdded { info_hash });
        sink.post(Alert::TorrentPaused { info_hash });

        assert_eq!(receiver.recv().await, Some(Alert::TorrentAdded { info_hash }));
        let paused = receiver.recv().await.unwrap();
        assert_eq!(paused.info_hash(), info_hash);
    }

    #[test]
    fn test_disabled_and_closed_sinks_do_not_fail() {
        AlertSink::disabled().post(Alert::TorrentAdded {
            info_hash: InfoHash::new([0; 20]),
        });

        let (sink, receiver) = AlertSink::channel();
        drop(receiver);
        sink.post(Alert::TorrentAdded {
            info_hash: InfoHash::new([0; 20]),
        });
    }
}
