//! Arbitration between two connections to the same peer.
//!
//! When both ends dial each other at the same time each side holds one
//! outgoing and one incoming connection. Both must drop the same TCP
//! connection without talking to each other, so the decision only uses
//! endpoints that both sides observe identically: each side's listen
//! endpoint. The side whose listen endpoint sorts lower keeps its
//! outgoing connection.

use std::cmp::Ordering;
use std::net::SocketAddr;

use super::peer::AttachedConnection;

/// Outcome of matching a new connection against an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arbitration {
    /// The new connection is dropped, the existing one stays.
    KeepExisting,
    /// The existing connection is dropped and replaced by the new one.
    ReplaceExisting,
    /// Both connections are to ourselves and must be dropped.
    SelfConnection,
}

/// Decides which of two connections to the same peer survives.
pub fn arbitrate(existing: &AttachedConnection, new: &AttachedConnection) -> Arbitration {
    if existing.remote == new.local || existing.local == new.remote {
        return Arbitration::SelfConnection;
    }

    // Both dialed in, or we dialed twice
    if existing.outgoing == new.outgoing {
        return Arbitration::KeepExisting;
    }

    let (outgoing, incoming) = if new.outgoing {
        (new, existing)
    } else {
        (existing, new)
    };

    // Our listen endpoint is where the incoming connection arrived, theirs
    // is where our outgoing connection went.
    let ours = incoming.local;
    let theirs = outgoing.remote;

    let keep_outgoing = listen_order(ours, theirs) != Ordering::Greater;
    match (keep_outgoing, new.outgoing) {
        (true, true) | (false, false) => Arbitration::ReplaceExisting,
        _ => Arbitration::KeepExisting,
    }
}

/// Port first, so peers behind NAT still agree in the common case; the
/// address breaks ties.
fn listen_order(a: SocketAddr, b: SocketAddr) -> Ordering {
    a.port()
        .cmp(&b.port())
        .then_with(|| a.ip().cmp(&b.ip()))
}
