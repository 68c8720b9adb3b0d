//! Request and response types exchanged with the tracker transport.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::torrent::InfoHash;

/// Announce event reported to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AnnounceEvent {
    /// Regular re-announce
    #[default]
    None,
    /// First announce of this session
    Started,
    /// The download just completed
    Completed,
    /// The torrent is stopping
    Stopped,
}

/// What a tracker request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Announce,
    Scrape,
}

/// A request handed to the tracker transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerRequest {
    pub info_hash: InfoHash,
    pub url: String,
    pub kind: RequestKind,
    pub event: AnnounceEvent,
    pub trackerid: Option<String>,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Bytes left to download, 0 for seeds
    pub left: u64,
    /// Bytes that failed the hash check
    pub corrupt: u64,
    pub redundant: u64,
    pub num_want: u32,
    pub listen_port: u16,
    /// Random key identifying this client across IP changes
    pub key: u32,
    /// Transport deadline; only set for stopped events
    pub timeout: Option<Duration>,
}

/// A successful announce reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackerResponse {
    pub interval: Duration,
    pub min_interval: Duration,
    pub trackerid: Option<String>,
    /// Seeds, -1 if not reported
    pub complete: i32,
    /// Leechers, -1 if not reported
    pub incomplete: i32,
    pub downloaded: i32,
    pub peers: Vec<SocketAddr>,
    pub warning_message: Option<String>,
    /// Our address as seen by the tracker
    pub external_ip: Option<IpAddr>,
}

/// A successful scrape reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeResponse {
    pub complete: i32,
    pub incomplete: i32,
    pub downloaded: i32,
}

/// A failed tracker request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerFailure {
    /// HTTP status, if the tracker answered at all
    pub status_code: Option<u16>,
    pub message: String,
    /// Retry delay requested by the tracker
    pub retry_interval: Duration,
}

impl TrackerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: message.into(),
            retry_interval: Duration::ZERO,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// The tracker told us it is gone for good.
    pub fn is_permanent(&self) -> bool {
        self.status_code == Some(410)
    }
}

/// Outcome of a tracker request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerReply {
    Announce(TrackerResponse),
    Scrape(ScrapeResponse),
    Failed(TrackerFailure),
}

/// A tracker reply routed back to its torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEvent {
    pub info_hash: InfoHash,
    pub url: String,
    pub kind: RequestKind,
    pub event: AnnounceEvent,
    pub reply: TrackerReply,
}
