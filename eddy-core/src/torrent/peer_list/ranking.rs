//! Ordering heuristics for connect and erase candidates.

use std::net::{IpAddr, SocketAddr};

use sha1::{Digest, Sha1};

use super::peer::{PeerSource, TorrentPeer};

/// Trust rank of a source set; the highest single source wins.
pub fn source_rank(source: PeerSource) -> u32 {
    let mut rank = 0;
    if source.contains(PeerSource::TRACKER) {
        rank |= 1 << 5;
    }
    if source.contains(PeerSource::LSD) {
        rank |= 1 << 4;
    }
    if source.contains(PeerSource::DHT) {
        rank |= 1 << 3;
    }
    if source.contains(PeerSource::PEX) {
        rank |= 1 << 2;
    }
    rank
}

/// Returns true for loopback, link-local and private network addresses.
pub fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Symmetric priority of the connection between two endpoints.
///
/// Both ends compute the same value, so peers in a swarm agree on which
/// pairs to prefer. Addresses in the same subnet keep more bits so nearby
/// peers still spread out.
pub fn peer_priority(a: SocketAddr, b: SocketAddr) -> u32 {
    let mut hasher = Sha1::new();

    if a.ip() == b.ip() {
        let (low, high) = if a.port() <= b.port() {
            (a.port(), b.port())
        } else {
            (b.port(), a.port())
        };
        hasher.update(low.to_be_bytes());
        hasher.update(high.to_be_bytes());
    } else {
        let (mut first, mut second) = (masked_bytes(a.ip(), b.ip()), masked_bytes(b.ip(), a.ip()));
        if first > second {
            std::mem::swap(&mut first, &mut second);
        }
        hasher.update(&first);
        hasher.update(&second);
    }

    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn masked_bytes(ip: IpAddr, other: IpAddr) -> Vec<u8> {
    match (ip, other) {
        (IpAddr::V4(v4), IpAddr::V4(other_v4)) => {
            let value = u32::from(v4);
            let other_value = u32::from(other_v4);
            let mask = if value >> 8 == other_value >> 8 {
                0xffff_ffff
            } else if value >> 16 == other_value >> 16 {
                0xffff_ff55
            } else {
                0xffff_5555
            };
            (value & mask).to_be_bytes().to_vec()
        }
        _ => {
            let bytes = match ip {
                IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
                IpAddr::V6(v6) => v6.octets(),
            };
            let other_bytes = match other {
                IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
                IpAddr::V6(v6) => v6.octets(),
            };
            let keep = if bytes[..6] == other_bytes[..6] { 16 } else { 6 };
            let mut masked = bytes.to_vec();
            for (i, byte) in masked.iter_mut().enumerate().skip(keep) {
                *byte &= if i < 8 { 0x55 } else { 0x00 };
            }
            masked
        }
    }
}

fn peer_rank(peer: &TorrentPeer, external: Option<SocketAddr>) -> u32 {
    match (peer.endpoint().socket_addr(), external) {
        (Some(addr), Some(ours)) => peer_priority(addr, ours),
        _ => 0,
    }
}

/// Returns true if `lhs` is a better peer to connect to than `rhs`.
///
/// Fewer failures first, then local peers, then the one connected the
/// longest time ago, then the better source, then the higher rank.
pub fn compare_peer(lhs: &TorrentPeer, rhs: &TorrentPeer, external: Option<SocketAddr>) -> bool {
    if lhs.failcount() != rhs.failcount() {
        return lhs.failcount() < rhs.failcount();
    }

    let lhs_local = lhs.ip().is_some_and(is_local);
    let rhs_local = rhs.ip().is_some_and(is_local);
    if lhs_local != rhs_local {
        return lhs_local;
    }

    if lhs.last_connected() != rhs.last_connected() {
        return lhs.last_connected() < rhs.last_connected();
    }

    let lhs_rank = source_rank(lhs.source());
    let rhs_rank = source_rank(rhs.source());
    if lhs_rank != rhs_rank {
        return lhs_rank > rhs_rank;
    }

    peer_rank(lhs, external) > peer_rank(rhs, external)
}

/// Returns true if `lhs` is a better peer to forget than `rhs`.
pub fn compare_peer_erase(lhs: &TorrentPeer, rhs: &TorrentPeer) -> bool {
    if lhs.failcount() != rhs.failcount() {
        return lhs.failcount() > rhs.failcount();
    }

    let lhs_resume = lhs.source().is_only(PeerSource::RESUME_DATA);
    let rhs_resume = rhs.source().is_only(PeerSource::RESUME_DATA);
    if lhs_resume != rhs_resume {
        return lhs_resume;
    }

    if lhs.is_connectable() != rhs.is_connectable() {
        return !lhs.is_connectable();
    }

    lhs.trust_points < rhs.trust_points
}
