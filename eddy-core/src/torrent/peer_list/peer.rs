//! Known peer records and the handles used to reference them.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::{BitOr, BitOrAssign};

use crate::torrent::connection::ConnectionId;

/// Checked reference to a peer slot in a [`super::PeerList`].
///
/// The generation changes every time a slot is reused, so a handle to an
/// erased peer never resolves to the peer that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerHandle {
    pub(super) index: u32,
    pub(super) generation: u32,
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}.{}", self.index, self.generation)
    }
}

/// Where a peer can be reached.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PeerEndpoint {
    Ip(SocketAddr),
    /// I2P destination, reached through the SAM bridge
    I2p(String),
}

impl PeerEndpoint {
    /// IP address, or `None` for I2P destinations.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            PeerEndpoint::Ip(addr) => Some(addr.ip()),
            PeerEndpoint::I2p(_) => None,
        }
    }

    /// Listen port, zero for I2P destinations.
    pub fn port(&self) -> u16 {
        match self {
            PeerEndpoint::Ip(addr) => addr.port(),
            PeerEndpoint::I2p(_) => 0,
        }
    }

    /// Socket address, or `None` for I2P destinations.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            PeerEndpoint::Ip(addr) => Some(*addr),
            PeerEndpoint::I2p(_) => None,
        }
    }
}

impl From<SocketAddr> for PeerEndpoint {
    fn from(addr: SocketAddr) -> Self {
        PeerEndpoint::Ip(addr)
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEndpoint::Ip(addr) => write!(f, "{addr}"),
            PeerEndpoint::I2p(destination) => write!(f, "{destination}.i2p"),
        }
    }
}

/// Set of places a peer was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PeerSource(u8);

impl PeerSource {
    pub const TRACKER: PeerSource = PeerSource(0x01);
    pub const DHT: PeerSource = PeerSource(0x02);
    pub const PEX: PeerSource = PeerSource(0x04);
    pub const LSD: PeerSource = PeerSource(0x08);
    pub const RESUME_DATA: PeerSource = PeerSource(0x10);
    pub const INCOMING: PeerSource = PeerSource(0x20);

    /// Empty source set.
    pub const fn empty() -> Self {
        PeerSource(0)
    }

    /// Returns true if every bit in `other` is set.
    pub fn contains(self, other: PeerSource) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Returns true if the peer was learned from exactly `other`.
    pub fn is_only(self, other: PeerSource) -> bool {
        self.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for PeerSource {
    type Output = PeerSource;

    fn bitor(self, rhs: PeerSource) -> PeerSource {
        PeerSource(self.0 | rhs.0)
    }
}

impl BitOrAssign for PeerSource {
    fn bitor_assign(&mut self, rhs: PeerSource) {
        self.0 |= rhs.0;
    }
}

/// A live connection attached to a peer entry.
///
/// Carries the endpoint pair so duplicate connections can be arbitrated
/// without asking the connection object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachedConnection {
    pub id: ConnectionId,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub outgoing: bool,
}

/// Trust points gained per passed piece, and the cap.
pub const TRUST_PASS_DELTA: i8 = 1;
pub const MAX_TRUST_POINTS: i8 = 8;
/// Trust points lost per failed piece, and the floor that triggers a ban.
pub const TRUST_FAIL_DELTA: i8 = 2;
pub const MIN_TRUST_POINTS: i8 = -7;
/// Failcount saturates here.
pub const MAX_FAILCOUNT: u8 = 31;

/// Everything known about one peer of a torrent.
///
/// Flags that feed the connect-candidate predicate are only writable
/// through [`super::PeerList`] so the candidate count stays exact.
#[derive(Debug, Clone)]
pub struct TorrentPeer {
    pub(super) endpoint: PeerEndpoint,
    pub(super) source: PeerSource,
    pub(super) failcount: u8,
    pub(super) connection: Option<AttachedConnection>,
    pub(super) banned: bool,
    pub(super) seed: bool,
    pub(super) connectable: bool,
    pub(super) web_seed: bool,
    pub(super) last_connected: u32,
    pub trust_points: i8,
    pub hashfails: u8,
    pub on_parole: bool,
    pub optimistically_unchoked: bool,
    pub total_downloaded: u64,
    pub total_uploaded: u64,
}

impl TorrentPeer {
    pub(super) fn new(endpoint: PeerEndpoint, connectable: bool, source: PeerSource) -> Self {
        Self {
            endpoint,
            source,
            failcount: 0,
            connection: None,
            banned: false,
            seed: false,
            connectable,
            web_seed: false,
            last_connected: 0,
            trust_points: 0,
            hashfails: 0,
            on_parole: false,
            optimistically_unchoked: false,
            total_downloaded: 0,
            total_uploaded: 0,
        }
    }

    pub fn endpoint(&self) -> &PeerEndpoint {
        &self.endpoint
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.endpoint.ip()
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    pub fn source(&self) -> PeerSource {
        self.source
    }

    pub fn failcount(&self) -> u8 {
        self.failcount
    }

    pub fn connection(&self) -> Option<&AttachedConnection> {
        self.connection.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_banned(&self) -> bool {
        self.banned
    }

    pub fn is_seed(&self) -> bool {
        self.seed
    }

    pub fn is_connectable(&self) -> bool {
        self.connectable
    }

    pub fn is_web_seed(&self) -> bool {
        self.web_seed
    }

    /// Session time in seconds of the last connection, 0 if never.
    pub fn last_connected(&self) -> u32 {
        self.last_connected
    }

    /// Raises trust after a passed piece, saturating at the cap.
    pub fn reward(&mut self) {
        self.trust_points = (self.trust_points + TRUST_PASS_DELTA).min(MAX_TRUST_POINTS);
        self.on_parole = false;
    }

    /// Lowers trust after a failed piece and counts the hash failure.
    ///
    /// Returns the new trust value.
    pub fn penalize(&mut self) -> i8 {
        self.trust_points = (self.trust_points - TRUST_FAIL_DELTA).max(MIN_TRUST_POINTS);
        self.hashfails = self.hashfails.saturating_add(1);
        self.trust_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_flags() {
        let source = PeerSource::TRACKER | PeerSource::DHT;
        assert!(source.contains(PeerSource::TRACKER));
        assert!(source.contains(PeerSource::DHT));
        assert!(!source.contains(PeerSource::LSD));
        assert!(!source.contains(PeerSource::empty()));
        assert!(PeerSource::RESUME_DATA.is_only(PeerSource::RESUME_DATA));
        assert!(!(PeerSource::RESUME_DATA | PeerSource::PEX).is_only(PeerSource::RESUME_DATA));
    }

    #[test]
    fn test_trust_clamping() {
        let addr: SocketAddr = "10.0.0.1:6881".parse().unwrap();
        let mut peer = TorrentPeer::new(addr.into(), true, PeerSource::TRACKER);

        for _ in 0..20 {
            peer.reward();
        }
        assert_eq!(peer.trust_points, MAX_TRUST_POINTS);

        peer.trust_points = -6;
        assert_eq!(peer.penalize(), MIN_TRUST_POINTS);
        assert_eq!(peer.penalize(), MIN_TRUST_POINTS);
        assert_eq!(peer.hashfails, 2);
    }

    #[test]
    fn test_reward_clears_parole() {
        let addr: SocketAddr = "10.0.0.1:6881".parse().unwrap();
        let mut peer = TorrentPeer::new(addr.into(), true, PeerSource::DHT);
        peer.on_parole = true;
        peer.reward();
        assert!(!peer.on_parole);
        assert_eq!(peer.trust_points, 1);
    }

    #[test]
    fn test_endpoint_display() {
        let ip = PeerEndpoint::Ip("1.2.3.4:80".parse().unwrap());
        assert_eq!(ip.to_string(), "1.2.3.4:80");
        assert_eq!(ip.port(), 80);

        let i2p = PeerEndpoint::I2p("abcdef".to_string());
        assert_eq!(i2p.to_string(), "abcdef.i2p");
        assert_eq!(i2p.ip(), None);
    }
}
