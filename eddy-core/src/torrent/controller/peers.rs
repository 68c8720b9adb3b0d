use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use super::Torrent;
use crate::torrent::alerts::Alert;
use crate::torrent::connection::{ConnectionId, DisconnectReason, PeerConnection};
use crate::torrent::peer_list::{AttachedConnection, PeerEndpoint, PeerHandle, PeerListState, PeerSource};
use crate::torrent::{PieceIndex, TorrentError, TorrentState};

/// Outgoing connection attempts started per tick.
const CONNECTIONS_PER_TICK: usize = 10;

impl Torrent {
    /// Adds a peer to the peer list.
    ///
    /// Returns `None` if the address was rejected or the list is full.
    pub fn add_peer(&mut self, addr: SocketAddr, source: PeerSource, now: Instant) -> Option<PeerHandle> {
        let ctx = self.policy_context(now);
        let mut state = PeerListState::default();
        let handle = self.peers.add_peer(addr, source, false, &ctx, &mut state);
        if state.first_time_seen {
            tracing::trace!(info_hash = %self.info_hash, peer = %addr, "New peer");
        }
        self.apply_peer_state(state, now);
        handle
    }

    pub fn add_i2p_peer(&mut self, destination: &str, source: PeerSource, now: Instant) -> Option<PeerHandle> {
        let ctx = self.policy_context(now);
        let mut state = PeerListState::default();
        let handle = self.peers.add_i2p_peer(destination, source, &ctx, &mut state);
        self.apply_peer_state(state, now);
        handle
    }

    fn want_more_peers(&self) -> bool {
        self.connections.len() < self.max_connections
            && !self.is_paused()
            && !self.aborted
            && self.error.is_none()
            && (self.layout.is_none()
                || !matches!(
                    self.state,
                    TorrentState::CheckingFiles | TorrentState::CheckingResumeData
                ))
            && self.peers.num_connect_candidates() > 0
    }

    /// Starts outgoing connections while more peers are wanted.
    pub fn connect_peers(&mut self, now: Instant) {
        for _ in 0..CONNECTIONS_PER_TICK {
            if !self.want_more_peers() {
                break;
            }
            let ctx = self.policy_context(now);
            let mut state = PeerListState::default();
            let candidate = self.peers.connect_one_peer(&ctx, &mut state);
            self.apply_peer_state(state, now);
            let Some(handle) = candidate else {
                break;
            };
            self.connect_to_peer(handle, now);
        }
    }

    /// Opens an outgoing connection to a known peer.
    fn connect_to_peer(&mut self, handle: PeerHandle, now: Instant) -> bool {
        let Some(endpoint) = self.peers.get(handle).map(|p| p.endpoint().clone()) else {
            return false;
        };
        match self.collab.connector.connect(self.info_hash, &endpoint) {
            Ok(mut connection) => {
                let id = connection.id();
                connection.set_peer(Some(handle));
                let attached = AttachedConnection {
                    id,
                    local: connection.local_endpoint(),
                    remote: connection.remote(),
                    outgoing: true,
                };
                self.peers.set_connection(handle, attached, self.session_time(now));
                tracing::debug!(info_hash = %self.info_hash, peer = %endpoint, %id, "Connecting to peer");
                self.connections.insert(id, connection);
                true
            }
            Err(e) => {
                tracing::debug!(info_hash = %self.info_hash, peer = %endpoint, error = %e, "Connect failed");
                self.peers.connect_failed(handle, self.session_time(now));
                false
            }
        }
    }

    /// Takes ownership of an incoming connection.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidState` - If the torrent is paused or removed
    /// - `TorrentError::PeerRejected` - If the peer list refused the connection
    pub fn attach_peer(
        &mut self,
        mut connection: Box<dyn PeerConnection>,
        now: Instant,
    ) -> Result<ConnectionId, TorrentError> {
        let remote = connection.remote();
        if self.aborted || self.is_paused() {
            connection.disconnect(DisconnectReason::TorrentPaused);
            return Err(TorrentError::InvalidState { state: self.state });
        }
        if self.connections.len() >= self.max_connections {
            connection.disconnect(DisconnectReason::TooManyConnections);
            return Err(TorrentError::PeerRejected {
                address: PeerEndpoint::Ip(remote),
            });
        }

        let id = connection.id();
        let attached = AttachedConnection {
            id,
            local: connection.local_endpoint(),
            remote,
            outgoing: connection.is_outgoing(),
        };
        let ctx = self.policy_context(now);
        let mut state = PeerListState::default();
        let result = self
            .peers
            .new_connection(attached, connection.fast_reconnect(), &ctx, &mut state);

        match result {
            Ok(handle) => {
                connection.set_peer(Some(handle));
                connection.send_upload_only(self.upload_mode || (self.is_finished() && !self.share_mode));
                if self.share_mode {
                    connection.send_share_mode(true);
                }
                tracing::debug!(info_hash = %self.info_hash, peer = %remote, %id, "Attached incoming peer");
                self.connections.insert(id, connection);
                self.apply_peer_state(state, now);
                Ok(id)
            }
            Err(reason) => {
                tracing::debug!(info_hash = %self.info_hash, peer = %remote, %reason, "Rejected incoming peer");
                connection.disconnect(reason);
                self.apply_peer_state(state, now);
                Err(TorrentError::PeerRejected {
                    address: PeerEndpoint::Ip(remote),
                })
            }
        }
    }

    /// The transport closed a connection on its own.
    pub fn on_peer_disconnected(&mut self, id: ConnectionId, now: Instant) {
        let Some(connection) = self.connections.remove(&id) else {
            return;
        };
        let mut state = PeerListState::default();
        self.detach_connection(connection, now, &mut state);
        self.apply_peer_state(state, now);
    }

    /// Closes one connection and updates the peer list.
    pub fn close_connection(&mut self, id: ConnectionId, reason: DisconnectReason, now: Instant) {
        let mut state = PeerListState::default();
        state.disconnect.push((id, reason));
        self.apply_peer_state(state, now);
    }

    /// Releases everything a removed connection held: availability counts,
    /// outstanding block requests and its peer list attachment.
    pub(super) fn detach_connection(
        &mut self,
        connection: Box<dyn PeerConnection>,
        now: Instant,
        state: &mut PeerListState,
    ) {
        let handle = connection.peer();
        if let Some(picker) = self.picker.as_mut() {
            if let Some(handle) = handle {
                for piece in connection.have_pieces() {
                    picker.dec_refcount(piece, handle);
                }
            }
            for pending in connection
                .download_queue()
                .into_iter()
                .chain(connection.request_queue())
            {
                picker.abort_download(pending.block, handle);
            }
        }

        let stats = connection.stats();
        self.counters.uploaded += stats.total_uploaded;
        let Some(handle) = handle else {
            return;
        };
        if let Some(peer) = self.peers.get_mut(handle) {
            peer.total_uploaded += stats.total_uploaded;
        }

        let ctx = self.policy_context(now);
        self.peers.connection_closed(
            handle,
            connection.id(),
            connection.failed(),
            connection.fast_reconnect(),
            &ctx,
            state,
        );
    }

    /// A connected peer announced a piece.
    pub fn peer_has_piece(&mut self, id: ConnectionId, piece: PieceIndex) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };
        if let (Some(handle), Some(picker)) = (connection.peer(), self.picker.as_mut()) {
            picker.inc_refcount(piece, handle);
        }
        connection.update_interest();
    }

    /// A connected peer turned out to have every piece.
    pub fn peer_is_seed(&mut self, id: ConnectionId, now: Instant) {
        let Some(handle) = self.connections.get(&id).and_then(|c| c.peer()) else {
            return;
        };
        self.peers.set_seed(handle, true);
        if self.is_seed() && self.config.swarm.close_redundant_connections {
            self.close_connection(id, DisconnectReason::UploadToUpload, now);
        }
    }

    /// Records the listen port a connected peer advertised.
    ///
    /// Returns false if the connection turned out to duplicate another
    /// peer and was closed.
    pub fn update_peer_port(&mut self, id: ConnectionId, port: u16, now: Instant) -> bool {
        let Some(handle) = self.connections.get(&id).and_then(|c| c.peer()) else {
            return false;
        };
        let ctx = self.policy_context(now);
        let mut state = PeerListState::default();
        let kept = self
            .peers
            .update_peer_port(handle, port, PeerSource::INCOMING, &ctx, &mut state);
        self.apply_peer_state(state, now);
        kept
    }

    /// Bans the peer at `addr` and closes its connection.
    ///
    /// Returns false if the address is not in the peer list.
    pub fn ban_peer(&mut self, addr: SocketAddr, now: Instant) -> bool {
        let Some(handle) = self.peers.find(&PeerEndpoint::Ip(addr)) else {
            return false;
        };
        self.peers.ban_peer(handle);
        tracing::info!(info_hash = %self.info_hash, peer = %addr, "Peer banned");
        self.post(Alert::PeerBanned {
            info_hash: self.info_hash,
            endpoint: PeerEndpoint::Ip(addr),
        });
        let connection = self
            .peers
            .get(handle)
            .and_then(|p| p.connection().map(|c| c.id));
        if let Some(id) = connection {
            self.close_connection(id, DisconnectReason::PeerBanned, now);
        }
        true
    }

    /// Closes up to `count` connections, slowest downloaders first.
    ///
    /// Returns the number closed.
    pub fn disconnect_peers(&mut self, count: usize, reason: DisconnectReason, now: Instant) -> usize {
        let mut ranked: Vec<(u64, bool, ConnectionId)> = self
            .connections
            .iter()
            .map(|(&id, c)| (c.stats().download_rate, !c.is_connecting(), id))
            .collect();
        // Connecting peers first, then by download rate
        ranked.sort();
        let mut state = PeerListState::default();
        state
            .disconnect
            .extend(ranked.into_iter().take(count).map(|(_, _, id)| (id, reason)));
        let closed = state.disconnect.len();
        self.apply_peer_state(state, now);
        closed
    }

    pub fn disconnect_all(&mut self, reason: DisconnectReason, now: Instant) {
        if self.connections.is_empty() {
            return;
        }
        tracing::debug!(info_hash = %self.info_hash, count = self.connections.len(), %reason, "Disconnecting all peers");
        let mut state = PeerListState::default();
        state
            .disconnect
            .extend(self.connections.keys().map(|&id| (id, reason)));
        self.apply_peer_state(state, now);
    }

    /// Drops and disconnects every peer whose address `blocked` rejects.
    pub fn apply_ip_filter(&mut self, blocked: impl Fn(IpAddr) -> bool, now: Instant) -> Vec<IpAddr> {
        let mut state = PeerListState::default();
        let banned = self.peers.apply_ip_filter(blocked, &mut state);
        if !banned.is_empty() {
            tracing::info!(info_hash = %self.info_hash, count = banned.len(), "Peers removed by IP filter");
        }
        self.apply_peer_state(state, now);
        banned
    }

    pub fn apply_port_filter(&mut self, blocked: impl Fn(u16) -> bool, now: Instant) -> Vec<IpAddr> {
        let mut state = PeerListState::default();
        let banned = self.peers.apply_port_filter(blocked, &mut state);
        self.apply_peer_state(state, now);
        banned
    }

    /// Our address as seen from outside, used to rank connect candidates.
    pub fn set_external_address(&mut self, addr: SocketAddr) {
        self.external_address = Some(addr);
    }

    /// Peers returned by a DHT lookup.
    pub fn on_dht_peers(&mut self, peers: &[SocketAddr], now: Instant) {
        self.post(Alert::DhtReply {
            info_hash: self.info_hash,
            num_peers: peers.len(),
        });
        for &addr in peers {
            self.add_peer(addr, PeerSource::DHT, now);
        }
    }

    /// Peers found through local service discovery.
    pub fn on_lsd_peer(&mut self, addr: SocketAddr, now: Instant) {
        self.add_peer(addr, PeerSource::LSD, now);
    }
}
