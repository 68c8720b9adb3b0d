//! Peer list policy: every peer ever known for a torrent.
//!
//! Peers live in an arena of generation-checked slots and are indexed in
//! address order. Mutations never reach back into the controller; instead
//! they record their side effects (erased handles, connections to close)
//! in a [`PeerListState`] the caller must apply before doing anything else.

pub mod duplicate;
pub mod peer;
pub mod ranking;

use std::net::{IpAddr, SocketAddr};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub use duplicate::{Arbitration, arbitrate};
pub use peer::{
    AttachedConnection, MAX_FAILCOUNT, PeerEndpoint, PeerHandle, PeerSource, TorrentPeer,
};
pub use ranking::{compare_peer, compare_peer_erase, is_local, peer_priority, source_rank};

use crate::torrent::connection::{ConnectionId, DisconnectReason};

/// Connect candidates gathered per scan.
const CANDIDATE_COUNT: usize = 10;
/// Peers visited per scan.
const MAX_SCAN_ITERATIONS: usize = 300;
/// Erase-on-add threshold in percent of the maximum list size.
const ERASE_THRESHOLD_PERCENT: usize = 95;

/// Torrent-side inputs for a peer list operation.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext {
    /// Whether the torrent has every wanted piece
    pub is_finished: bool,
    pub max_failcount: u8,
    /// Maximum list size, 0 = unbounded
    pub max_peerlist_size: usize,
    pub allow_multiple_connections_per_ip: bool,
    pub no_connect_privileged_ports: bool,
    /// Seconds between reconnects, multiplied by failcount + 1
    pub min_reconnect_time: u32,
    /// Seconds since the session started
    pub session_time: u32,
    /// Our external endpoint, used for peer ranking
    pub external: Option<SocketAddr>,
}

impl Default for PolicyContext {
    fn default() -> Self {
        Self {
            is_finished: false,
            max_failcount: 3,
            max_peerlist_size: 4000,
            allow_multiple_connections_per_ip: false,
            no_connect_privileged_ports: false,
            min_reconnect_time: 60,
            session_time: 0,
            external: None,
        }
    }
}

/// Side effects of a peer list mutation.
///
/// Every handle in `erased` is already invalid and must be purged from
/// dependent structures, and every connection in `disconnect` closed,
/// before control returns to the event loop.
#[derive(Debug, Default)]
pub struct PeerListState {
    pub erased: Vec<PeerHandle>,
    pub disconnect: Vec<(ConnectionId, DisconnectReason)>,
    /// Set by `add_peer` when the peer was not known before
    pub first_time_seen: bool,
}

impl PeerListState {
    pub fn is_empty(&self) -> bool {
        self.erased.is_empty() && self.disconnect.is_empty()
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    peer: Option<TorrentPeer>,
}

/// Address-ordered set of all known peers for one torrent.
#[derive(Debug)]
pub struct PeerList {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Handles sorted by endpoint
    order: Vec<PeerHandle>,
    round_robin: usize,
    candidate_cache: Vec<PeerHandle>,
    num_connect_candidates: usize,
    reported_candidates: bool,
    num_seeds: usize,
    finished: bool,
    max_failcount: u8,
    rng: ChaCha8Rng,
}

impl PeerList {
    /// Creates an empty peer list.
    ///
    /// `seed` makes the eviction scan start position reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            round_robin: 0,
            candidate_cache: Vec::new(),
            num_connect_candidates: 0,
            reported_candidates: false,
            num_seeds: 0,
            finished: false,
            max_failcount: 3,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn num_seeds(&self) -> usize {
        self.num_seeds
    }

    pub fn num_connect_candidates(&self) -> usize {
        self.num_connect_candidates
    }

    /// Resolves a handle, `None` if the peer was erased.
    pub fn get(&self, handle: PeerHandle) -> Option<&TorrentPeer> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.peer.as_ref()
    }

    /// Mutable access to a peer's bookkeeping fields.
    ///
    /// Candidate-relevant flags stay private to the list.
    pub fn get_mut(&mut self, handle: PeerHandle) -> Option<&mut TorrentPeer> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.peer.as_mut()
    }

    pub fn contains(&self, handle: PeerHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Peers in address order.
    pub fn iter(&self) -> impl Iterator<Item = (PeerHandle, &TorrentPeer)> + '_ {
        self.order
            .iter()
            .filter_map(|&handle| self.get(handle).map(|peer| (handle, peer)))
    }

    /// Finds a peer by exact endpoint.
    pub fn find(&self, endpoint: &PeerEndpoint) -> Option<PeerHandle> {
        let pos = self.lower_bound(endpoint);
        let handle = *self.order.get(pos)?;
        (self.peer(handle).endpoint() == endpoint).then_some(handle)
    }

    /// Finds the first peer with the given IP address.
    pub fn find_ip(&self, ip: IpAddr) -> Option<PeerHandle> {
        let pos = self.lower_bound(&PeerEndpoint::Ip(SocketAddr::new(ip, 0)));
        let handle = *self.order.get(pos)?;
        (self.peer(handle).ip() == Some(ip)).then_some(handle)
    }

    /// The connect-candidate predicate.
    pub fn is_connect_candidate(&self, peer: &TorrentPeer) -> bool {
        candidate_predicate(peer, self.finished, self.max_failcount)
    }

    /// Reports a change between "no candidates" and "some candidates".
    ///
    /// Returns `Some(has_candidates)` once per transition.
    pub fn take_candidates_transition(&mut self) -> Option<bool> {
        let has = self.num_connect_candidates > 0;
        if has == self.reported_candidates {
            return None;
        }
        self.reported_candidates = has;
        Some(has)
    }

    /// Picks up finished-state and failcount-limit changes.
    pub fn sync_context(&mut self, ctx: &PolicyContext) {
        if ctx.is_finished != self.finished || ctx.max_failcount != self.max_failcount {
            self.finished = ctx.is_finished;
            self.max_failcount = ctx.max_failcount;
            self.recalculate_connect_candidates();
        }
    }

    fn recalculate_connect_candidates(&mut self) {
        self.num_connect_candidates = self
            .order
            .iter()
            .filter(|&&handle| self.is_connect_candidate(self.peer(handle)))
            .count();
    }

    fn update_connect_candidates(&mut self, was_candidate: bool, is_candidate: bool) {
        match (was_candidate, is_candidate) {
            (false, true) => self.num_connect_candidates += 1,
            (true, false) => {
                self.num_connect_candidates = self.num_connect_candidates.saturating_sub(1)
            }
            _ => {}
        }
    }

    /// Applies `change` to a live peer and keeps the candidate count exact.
    fn mutate<R>(&mut self, handle: PeerHandle, change: impl FnOnce(&mut TorrentPeer) -> R) -> Option<R> {
        let was = self.is_connect_candidate(self.get(handle)?);
        let finished = self.finished;
        let max_failcount = self.max_failcount;
        let peer = self.get_mut(handle)?;
        let result = change(peer);
        let is = candidate_predicate(peer, finished, max_failcount);
        self.update_connect_candidates(was, is);
        Some(result)
    }

    fn peer(&self, handle: PeerHandle) -> &TorrentPeer {
        // Handles in `order` always resolve
        match self.get(handle) {
            Some(peer) => peer,
            None => unreachable!("stale handle {handle} in peer order"),
        }
    }

    fn lower_bound(&self, endpoint: &PeerEndpoint) -> usize {
        self.order
            .partition_point(|&handle| self.peer(handle).endpoint() < endpoint)
    }

    fn allocate(&mut self, peer: TorrentPeer) -> PeerHandle {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.peer = Some(peer);
                PeerHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    peer: Some(peer),
                });
                PeerHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn full(&self, ctx: &PolicyContext) -> bool {
        ctx.max_peerlist_size != 0 && self.order.len() >= ctx.max_peerlist_size
    }

    /// Adds a peer learned from a tracker, DHT, LSD, PEX or resume data.
    ///
    /// Returns `None` when the address is unusable or filtered, or when
    /// the list is full and eviction could not make room.
    pub fn add_peer(
        &mut self,
        addr: SocketAddr,
        source: PeerSource,
        seed: bool,
        ctx: &PolicyContext,
        state: &mut PeerListState,
    ) -> Option<PeerHandle> {
        if addr.ip().is_unspecified() || addr.port() == 0 {
            return None;
        }
        if let IpAddr::V6(v6) = addr.ip() {
            if (v6.segments()[0] & 0xffc0) == 0xfe80 {
                return None;
            }
        }
        if ctx.no_connect_privileged_ports
            && addr.port() < 1024
            && source.is_only(PeerSource::DHT)
        {
            tracing::debug!("Ignoring DHT peer {} on privileged port", addr);
            return None;
        }
        self.sync_context(ctx);

        let existing = if ctx.allow_multiple_connections_per_ip {
            self.find(&PeerEndpoint::Ip(addr))
        } else {
            self.find_ip(addr.ip())
        };

        match existing {
            Some(handle) => {
                self.update_peer(handle, addr.port(), source, seed);
                state.first_time_seen = false;
                Some(handle)
            }
            None => {
                let handle = self.insert_peer(
                    TorrentPeer::new(PeerEndpoint::Ip(addr), true, source),
                    seed,
                    ctx,
                    state,
                )?;
                state.first_time_seen = true;
                Some(handle)
            }
        }
    }

    /// Adds a peer reachable through an I2P destination.
    pub fn add_i2p_peer(
        &mut self,
        destination: &str,
        source: PeerSource,
        ctx: &PolicyContext,
        state: &mut PeerListState,
    ) -> Option<PeerHandle> {
        if destination.is_empty() {
            return None;
        }
        self.sync_context(ctx);
        let endpoint = PeerEndpoint::I2p(destination.to_string());
        if let Some(handle) = self.find(&endpoint) {
            self.mutate(handle, |peer| {
                peer.source |= source;
                peer.connectable = true;
            });
            state.first_time_seen = false;
            return Some(handle);
        }
        let handle = self.insert_peer(TorrentPeer::new(endpoint, true, source), false, ctx, state)?;
        state.first_time_seen = true;
        Some(handle)
    }

    fn update_peer(&mut self, handle: PeerHandle, port: u16, source: PeerSource, seed: bool) {
        let mut seed_added = false;
        self.mutate(handle, |peer| {
            peer.connectable = true;
            if let PeerEndpoint::Ip(addr) = &mut peer.endpoint {
                addr.set_port(port);
            }
            peer.source |= source;

            // Someone else reached it, give it another try
            if peer.failcount > 0 && source.is_only(PeerSource::TRACKER) {
                peer.failcount -= 1;
            }

            if seed && peer.connection.is_none() && !peer.seed {
                peer.seed = true;
                seed_added = !peer.web_seed;
            }
        });
        if seed_added {
            self.num_seeds += 1;
        }
        self.resort(handle);
    }

    /// Restores address order after an endpoint changed in place.
    fn resort(&mut self, handle: PeerHandle) {
        if let Some(pos) = self.order.iter().position(|&h| h == handle) {
            self.order.remove(pos);
            if self.round_robin > pos {
                self.round_robin -= 1;
            }
            let endpoint = self.peer(handle).endpoint().clone();
            let new_pos = self.lower_bound(&endpoint);
            self.order.insert(new_pos, handle);
            if self.round_robin >= new_pos && self.round_robin < self.order.len() - 1 {
                self.round_robin += 1;
            }
        }
    }

    fn insert_peer(
        &mut self,
        peer: TorrentPeer,
        seed: bool,
        ctx: &PolicyContext,
        state: &mut PeerListState,
    ) -> Option<PeerHandle> {
        if self.full(ctx) {
            if peer.source.is_only(PeerSource::RESUME_DATA) {
                return None;
            }
            self.erase_peers(ctx, false, state);
            if self.full(ctx) {
                tracing::debug!("Peer list full, rejecting {}", peer.endpoint);
                return None;
            }
        }

        let pos = self.lower_bound(&peer.endpoint);
        let handle = self.allocate(peer);
        self.order.insert(pos, handle);
        if self.round_robin >= pos && self.order.len() > 1 {
            self.round_robin += 1;
        }

        if seed {
            if let Some(peer) = self.get_mut(handle) {
                peer.seed = true;
            }
            self.num_seeds += 1;
        }
        let candidate = self.is_connect_candidate(self.peer(handle));
        self.update_connect_candidates(false, candidate);
        Some(handle)
    }

    /// Removes a peer. Erasing an already erased handle does nothing.
    pub fn erase_peer(&mut self, handle: PeerHandle, state: &mut PeerListState) {
        let Some(pos) = self.order.iter().position(|&h| h == handle) else {
            return;
        };
        self.erase_at(pos, state);
    }

    fn erase_at(&mut self, pos: usize, state: &mut PeerListState) {
        let handle = self.order[pos];
        let (was_candidate, was_seed, web_seed) = {
            let peer = self.peer(handle);
            (self.is_connect_candidate(peer), peer.seed, peer.web_seed)
        };
        if was_seed && !web_seed {
            self.num_seeds = self.num_seeds.saturating_sub(1);
        }
        self.update_connect_candidates(was_candidate, false);

        if self.round_robin > pos {
            self.round_robin -= 1;
        }
        self.order.remove(pos);
        if self.round_robin >= self.order.len() {
            self.round_robin = 0;
        }
        self.candidate_cache.retain(|&h| h != handle);

        let slot = &mut self.slots[handle.index as usize];
        slot.peer = None;
        self.free.push(handle.index);
        state.erased.push(handle);
    }

    /// Removes every peer.
    pub fn clear(&mut self, state: &mut PeerListState) {
        while !self.order.is_empty() {
            let last = self.order.len() - 1;
            self.erase_at(last, state);
        }
    }

    fn is_erase_candidate(&self, peer: &TorrentPeer) -> bool {
        if peer.connection.is_some() || self.is_connect_candidate(peer) {
            return false;
        }
        peer.failcount > 0 || peer.source.is_only(PeerSource::RESUME_DATA)
    }

    fn should_erase_immediately(peer: &TorrentPeer) -> bool {
        peer.source.is_only(PeerSource::RESUME_DATA)
    }

    /// Evicts peers once the list reaches 95% of its maximum size.
    ///
    /// Scans a bounded window from a random start. Resume-only peers met on
    /// the way are dropped at once; otherwise the best erase candidate is
    /// dropped, or with `force` any unconnected peer.
    pub fn erase_peers(&mut self, ctx: &PolicyContext, force: bool, state: &mut PeerListState) {
        let max = ctx.max_peerlist_size;
        if max == 0 || self.order.is_empty() {
            return;
        }
        self.sync_context(ctx);

        let mut low_watermark = max * ERASE_THRESHOLD_PERCENT / 100;
        if low_watermark == max {
            low_watermark -= 1;
        }

        let mut erase_candidate: Option<usize> = None;
        let mut force_candidate: Option<usize> = None;
        let mut cursor = self.rng.random_range(0..self.order.len());

        let mut iterations = self.order.len().min(MAX_SCAN_ITERATIONS);
        while iterations > 0 {
            iterations -= 1;
            if self.order.len() < low_watermark {
                break;
            }
            if cursor >= self.order.len() {
                cursor = 0;
            }
            let current = cursor;
            let peer = self.peer(self.order[current]);

            if self.is_erase_candidate(peer)
                && erase_candidate
                    .is_none_or(|c| !compare_peer_erase(self.peer(self.order[c]), peer))
            {
                if Self::should_erase_immediately(peer) {
                    shift_after_erase(&mut erase_candidate, current);
                    shift_after_erase(&mut force_candidate, current);
                    self.erase_at(current, state);
                    continue;
                }
                erase_candidate = Some(current);
            }

            if peer.connection.is_none()
                && force_candidate
                    .is_none_or(|c| !compare_peer_erase(self.peer(self.order[c]), peer))
            {
                force_candidate = Some(current);
            }
            cursor += 1;
        }

        if let Some(pos) = erase_candidate {
            self.erase_at(pos, state);
        } else if let (true, Some(pos)) = (force, force_candidate) {
            self.erase_at(pos, state);
        }
    }

    fn find_connect_candidates(&mut self, ctx: &PolicyContext, state: &mut PeerListState) -> Vec<PeerHandle> {
        let mut candidates: Vec<PeerHandle> = Vec::with_capacity(CANDIDATE_COUNT);
        let mut erase_candidate: Option<usize> = None;
        let weeding = ctx.max_peerlist_size > 0
            && self.order.len() * 100 >= ctx.max_peerlist_size * ERASE_THRESHOLD_PERCENT;

        let mut iterations = self.order.len().min(MAX_SCAN_ITERATIONS);
        while iterations > 0 && !self.order.is_empty() {
            iterations -= 1;
            if self.round_robin >= self.order.len() {
                self.round_robin = 0;
            }
            let current = self.round_robin;
            let handle = self.order[current];

            if weeding {
                let peer = self.peer(handle);
                if self.is_erase_candidate(peer)
                    && erase_candidate
                        .is_none_or(|c| !compare_peer_erase(self.peer(self.order[c]), peer))
                {
                    if Self::should_erase_immediately(peer) {
                        shift_after_erase(&mut erase_candidate, current);
                        self.erase_at(current, state);
                        continue;
                    }
                    erase_candidate = Some(current);
                }
            }

            self.round_robin += 1;

            let peer = self.peer(handle);
            if !self.is_connect_candidate(peer) {
                continue;
            }
            if peer.last_connected != 0
                && ctx.session_time.saturating_sub(peer.last_connected)
                    < (u32::from(peer.failcount) + 1) * ctx.min_reconnect_time
            {
                continue;
            }

            if candidates.len() == CANDIDATE_COUNT {
                let worst = self.peer(candidates[CANDIDATE_COUNT - 1]);
                if compare_peer(worst, peer, ctx.external) {
                    continue;
                }
                candidates.truncate(CANDIDATE_COUNT - 1);
            }

            let pos = candidates
                .partition_point(|&c| compare_peer(self.peer(c), peer, ctx.external));
            candidates.insert(pos, handle);
        }

        if let Some(pos) = erase_candidate {
            let erased = self.order[pos];
            candidates.retain(|&c| c != erased);
            self.erase_at(pos, state);
        }
        candidates
    }

    /// Chooses the next peer to dial.
    ///
    /// The caller attaches the outgoing connection with
    /// [`Self::set_connection`], or reports failure with
    /// [`Self::inc_failcount`].
    pub fn connect_one_peer(&mut self, ctx: &PolicyContext, state: &mut PeerListState) -> Option<PeerHandle> {
        self.sync_context(ctx);

        let cache = std::mem::take(&mut self.candidate_cache);
        self.candidate_cache = cache
            .into_iter()
            .filter(|&h| self.get(h).is_some_and(|p| self.is_connect_candidate(p)))
            .collect();

        if self.candidate_cache.is_empty() {
            self.candidate_cache = self.find_connect_candidates(ctx, state);
            if self.candidate_cache.is_empty() {
                return None;
            }
        }
        Some(self.candidate_cache.remove(0))
    }

    /// Attaches an outgoing connection to a peer.
    pub fn set_connection(&mut self, handle: PeerHandle, connection: AttachedConnection, session_time: u32) -> bool {
        self.mutate(handle, |peer| {
            peer.connection = Some(connection);
            peer.last_connected = session_time;
        })
        .is_some()
    }

    /// Matches an incoming connection against the list.
    ///
    /// On success the connection is attached and its peer returned. A
    /// replaced duplicate is queued in `state.disconnect`.
    ///
    /// # Errors
    ///
    /// - `DisconnectReason` - Why the new connection must be closed
    pub fn new_connection(
        &mut self,
        connection: AttachedConnection,
        fast_reconnect: bool,
        ctx: &PolicyContext,
        state: &mut PeerListState,
    ) -> Result<PeerHandle, DisconnectReason> {
        self.sync_context(ctx);
        let remote = connection.remote;

        let existing = if ctx.allow_multiple_connections_per_ip {
            self.find(&PeerEndpoint::Ip(remote))
        } else {
            self.find_ip(remote.ip())
        };

        let handle = match existing {
            Some(handle) => {
                let peer = self.peer(handle);
                if peer.banned {
                    return Err(DisconnectReason::PeerBanned);
                }
                if let Some(current) = peer.connection {
                    match arbitrate(&current, &connection) {
                        Arbitration::SelfConnection => {
                            state
                                .disconnect
                                .push((current.id, DisconnectReason::SelfConnection));
                            return Err(DisconnectReason::SelfConnection);
                        }
                        Arbitration::KeepExisting => {
                            return Err(DisconnectReason::DuplicatePeer);
                        }
                        Arbitration::ReplaceExisting => {
                            tracing::debug!(
                                "Replacing duplicate connection to {} ({} -> {})",
                                remote,
                                current.id,
                                connection.id
                            );
                            state
                                .disconnect
                                .push((current.id, DisconnectReason::DuplicatePeer));
                        }
                    }
                }
                handle
            }
            None => {
                if self.full(ctx) {
                    self.erase_peers(ctx, true, state);
                    if self.full(ctx) {
                        return Err(DisconnectReason::TooManyConnections);
                    }
                }
                let peer = TorrentPeer::new(PeerEndpoint::Ip(remote), false, PeerSource::INCOMING);
                match self.insert_peer(peer, false, ctx, state) {
                    Some(handle) => handle,
                    None => return Err(DisconnectReason::TooManyConnections),
                }
            }
        };

        self.mutate(handle, |peer| {
            peer.connection = Some(connection);
            if !fast_reconnect {
                peer.last_connected = ctx.session_time;
            }
        });
        Ok(handle)
    }

    /// Detaches a closed connection from its peer.
    ///
    /// Does nothing if the peer is gone or already holds another
    /// connection (a replaced duplicate closing late).
    pub fn connection_closed(
        &mut self,
        handle: PeerHandle,
        id: ConnectionId,
        failed: bool,
        fast_reconnect: bool,
        ctx: &PolicyContext,
        state: &mut PeerListState,
    ) {
        let attached = self
            .get(handle)
            .and_then(|peer| peer.connection)
            .is_some_and(|c| c.id == id);
        if !attached {
            return;
        }

        let session_time = ctx.session_time;
        self.mutate(handle, |peer| {
            peer.connection = None;
            peer.optimistically_unchoked = false;
            if !fast_reconnect {
                peer.last_connected = session_time;
            }
            if failed && peer.failcount < MAX_FAILCOUNT {
                peer.failcount += 1;
            }
        });

        // An incoming peer that never told us its listen port cannot be
        // told apart from the next connection from the same IP.
        if ctx.allow_multiple_connections_per_ip && self.get(handle).is_some_and(|p| !p.connectable) {
            self.erase_peer(handle, state);
        }
    }

    /// Records the listen port a connected peer advertised.
    ///
    /// Returns false if the peer turned out to duplicate another entry and
    /// was erased; its connection is then queued for closing.
    pub fn update_peer_port(
        &mut self,
        handle: PeerHandle,
        port: u16,
        source: PeerSource,
        ctx: &PolicyContext,
        state: &mut PeerListState,
    ) -> bool {
        let Some(peer) = self.get(handle) else {
            return false;
        };
        if peer.port() == port {
            return true;
        }
        let Some(ip) = peer.ip() else {
            return true;
        };

        if ctx.allow_multiple_connections_per_ip {
            let target = PeerEndpoint::Ip(SocketAddr::new(ip, port));
            if let Some(other) = self.find(&target).filter(|&h| h != handle) {
                let other_connected = self.peer(other).connection.is_some();
                if other_connected {
                    self.mutate(other, |pp| {
                        pp.connectable = true;
                        pp.source |= source;
                    });
                    if let Some(connection) = self.peer(handle).connection {
                        state
                            .disconnect
                            .push((connection.id, DisconnectReason::DuplicatePeer));
                    }
                    self.erase_peer(handle, state);
                    return false;
                }
                self.erase_peer(other, state);
            }
        }

        self.mutate(handle, |peer| {
            if let PeerEndpoint::Ip(addr) = &mut peer.endpoint {
                addr.set_port(port);
            }
            peer.source |= source;
            peer.connectable = true;
        });
        self.resort(handle);
        true
    }

    /// Bans a peer. Returns false if the peer is gone.
    pub fn ban_peer(&mut self, handle: PeerHandle) -> bool {
        self.mutate(handle, |peer| peer.banned = true).is_some()
    }

    pub fn set_seed(&mut self, handle: PeerHandle, seed: bool) {
        let Some(peer) = self.get(handle) else {
            return;
        };
        if peer.seed == seed {
            return;
        }
        let web_seed = peer.web_seed;
        self.mutate(handle, |peer| peer.seed = seed);
        if web_seed {
            return;
        }
        if seed {
            self.num_seeds += 1;
        } else {
            self.num_seeds = self.num_seeds.saturating_sub(1);
        }
    }

    /// Web seeds are never connect candidates and don't count as seeds.
    pub fn set_web_seed(&mut self, handle: PeerHandle, web_seed: bool) {
        let Some(peer) = self.get(handle) else {
            return;
        };
        if peer.web_seed == web_seed {
            return;
        }
        let seed = peer.seed;
        self.mutate(handle, |peer| peer.web_seed = web_seed);
        if seed && web_seed {
            self.num_seeds = self.num_seeds.saturating_sub(1);
        } else if seed {
            self.num_seeds += 1;
        }
    }

    pub fn set_connectable(&mut self, handle: PeerHandle, connectable: bool) {
        self.mutate(handle, |peer| peer.connectable = connectable);
    }

    pub fn inc_failcount(&mut self, handle: PeerHandle) {
        self.mutate(handle, |peer| {
            if peer.failcount < MAX_FAILCOUNT {
                peer.failcount += 1;
            }
        });
    }

    /// An outgoing attempt failed before a connection existed. The peer
    /// waits out the reconnect delay like a closed connection would.
    pub fn connect_failed(&mut self, handle: PeerHandle, session_time: u32) {
        self.mutate(handle, |peer| {
            peer.last_connected = session_time;
            if peer.failcount < MAX_FAILCOUNT {
                peer.failcount += 1;
            }
        });
    }

    pub fn set_failcount(&mut self, handle: PeerHandle, failcount: u8) {
        self.mutate(handle, |peer| peer.failcount = failcount.min(MAX_FAILCOUNT));
    }

    /// Disconnects and erases every peer whose address `blocked` rejects.
    ///
    /// Returns the blocked addresses.
    pub fn apply_ip_filter(
        &mut self,
        blocked: impl Fn(IpAddr) -> bool,
        state: &mut PeerListState,
    ) -> Vec<IpAddr> {
        let handles: Vec<PeerHandle> = self
            .iter()
            .filter(|(_, peer)| peer.ip().is_some_and(&blocked))
            .map(|(handle, _)| handle)
            .collect();
        self.remove_filtered(handles, DisconnectReason::BannedByIpFilter, state)
    }

    /// Disconnects and erases every peer whose port `blocked` rejects.
    pub fn apply_port_filter(
        &mut self,
        blocked: impl Fn(u16) -> bool,
        state: &mut PeerListState,
    ) -> Vec<IpAddr> {
        let handles: Vec<PeerHandle> = self
            .iter()
            .filter(|(_, peer)| peer.ip().is_some() && blocked(peer.port()))
            .map(|(handle, _)| handle)
            .collect();
        self.remove_filtered(handles, DisconnectReason::BannedByPortFilter, state)
    }

    fn remove_filtered(
        &mut self,
        handles: Vec<PeerHandle>,
        reason: DisconnectReason,
        state: &mut PeerListState,
    ) -> Vec<IpAddr> {
        let mut banned = Vec::new();
        for handle in handles {
            let peer = self.peer(handle);
            if let Some(ip) = peer.ip() {
                banned.push(ip);
            }
            if let Some(connection) = peer.connection {
                state.disconnect.push((connection.id, reason));
            }
            self.erase_peer(handle, state);
        }
        banned
    }

    /// Recounts candidates and seeds from scratch and compares with the
    /// maintained counters.
    #[cfg(test)]
    pub(crate) fn check_invariant(&self) {
        let candidates = self
            .iter()
            .filter(|(_, p)| self.is_connect_candidate(p))
            .count();
        assert_eq!(candidates, self.num_connect_candidates, "candidate count");
        let seeds = self.iter().filter(|(_, p)| p.seed && !p.web_seed).count();
        assert_eq!(seeds, self.num_seeds, "seed count");
        assert!(self.order.windows(2).all(|w| self.peer(w[0]).endpoint() <= self.peer(w[1]).endpoint()));
    }
}

fn candidate_predicate(peer: &TorrentPeer, finished: bool, max_failcount: u8) -> bool {
    !(peer.connection.is_some()
        || peer.banned
        || peer.web_seed
        || !peer.connectable
        || (peer.seed && finished)
        || peer.failcount >= max_failcount)
}

fn shift_after_erase(candidate: &mut Option<usize>, erased: usize) {
    if let Some(c) = candidate {
        if *c > erased {
            *c -= 1;
        }
    }
}

#[cfg(test)]
mod tests;
