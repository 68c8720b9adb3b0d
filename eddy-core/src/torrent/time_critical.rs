//! Deadline-driven piece requests for streaming consumers.
//!
//! Pieces with a deadline are kept in deadline order. Each pass hands the
//! next free block of the most urgent piece to the peer expected to drain
//! its queue first, until the peers are saturated or the next deadline lies
//! beyond the estimated piece download time.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use super::PieceIndex;
use super::connection::{ConnectionId, PeerConnection, RequestFlags};
use super::picker::{BLOCK_SIZE, BlockRef, BlockState, PiecePicker};

/// Weight of the previous estimate, in tenths.
const OLD_WEIGHT: u64 = 6;
/// Weight of a new sample, in tenths.
const NEW_WEIGHT: u64 = 4;

/// A piece someone is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeCriticalPiece {
    pub piece: PieceIndex,
    pub deadline: Instant,
    /// First block request sent for this piece
    pub first_requested: Option<Instant>,
    /// Latest non-busy block request
    pub last_requested: Option<Instant>,
    /// Block requests issued for this piece
    pub peers: u32,
}

/// Moving estimate of how long a time-critical piece takes to arrive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PieceTimeEstimator {
    average_ms: u64,
    deviation_ms: u64,
}

impl PieceTimeEstimator {
    pub fn record(&mut self, download_time: Duration) {
        let sample = download_time.as_millis() as u64;
        if self.average_ms == 0 {
            self.average_ms = sample;
            return;
        }
        let diff = sample.abs_diff(self.average_ms);
        self.deviation_ms = if self.deviation_ms == 0 {
            diff
        } else {
            (self.deviation_ms * OLD_WEIGHT + diff * NEW_WEIGHT) / 10
        };
        self.average_ms = (self.average_ms * OLD_WEIGHT + sample * NEW_WEIGHT) / 10;
    }

    pub fn average(&self) -> Duration {
        Duration::from_millis(self.average_ms)
    }

    pub fn deviation(&self) -> Duration {
        Duration::from_millis(self.deviation_ms)
    }

    /// How far ahead of now deadlines are worth requesting.
    pub fn horizon(&self, margin: Duration) -> Duration {
        Duration::from_millis(self.average_ms + 4 * self.deviation_ms) + margin
    }

    /// How many times a fully requested piece has stalled since `since`.
    fn timeouts(&self, now: Instant, since: Instant) -> u32 {
        if self.average_ms == 0 {
            return 0;
        }
        let elapsed = now.saturating_duration_since(since).as_millis() as u64;
        (elapsed / (self.average_ms + self.deviation_ms / 2).max(1)) as u32
    }
}

/// Limits applied to one request pass.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    /// Stop once the fastest peer's queue takes longer than this
    pub max_queue_time: Duration,
    pub horizon_margin: Duration,
}

/// Time-critical pieces in deadline order.
#[derive(Debug, Default)]
pub struct TimeCriticalQueue {
    pieces: Vec<TimeCriticalPiece>,
    estimator: PieceTimeEstimator,
}

impl TimeCriticalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn contains(&self, piece: PieceIndex) -> bool {
        self.pieces.iter().any(|p| p.piece == piece)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeCriticalPiece> {
        self.pieces.iter()
    }

    pub fn estimator(&self) -> &PieceTimeEstimator {
        &self.estimator
    }

    pub fn piece_set(&self) -> BTreeSet<PieceIndex> {
        self.pieces.iter().map(|p| p.piece).collect()
    }

    /// Sets or moves a piece's deadline. Returns true if the piece was new.
    pub fn set_deadline(&mut self, piece: PieceIndex, deadline: Instant) -> bool {
        let existing = self.pieces.iter().position(|p| p.piece == piece);
        let entry = match existing {
            Some(pos) => {
                let mut entry = self.pieces.remove(pos);
                entry.deadline = deadline;
                entry
            }
            None => TimeCriticalPiece {
                piece,
                deadline,
                first_requested: None,
                last_requested: None,
                peers: 0,
            },
        };
        // Equal deadlines keep insertion order
        let pos = self.pieces.partition_point(|p| p.deadline <= deadline);
        self.pieces.insert(pos, entry);
        existing.is_none()
    }

    /// Drops a piece from the queue.
    ///
    /// A `finished` piece that was actually requested feeds its download
    /// time into the estimator.
    pub fn remove(&mut self, piece: PieceIndex, finished: bool, now: Instant) -> Option<TimeCriticalPiece> {
        let pos = self.pieces.iter().position(|p| p.piece == piece)?;
        let entry = self.pieces.remove(pos);
        if finished {
            if let Some(first) = entry.first_requested {
                self.estimator.record(now.saturating_duration_since(first));
            }
        }
        Some(entry)
    }

    /// Drops every piece `filtered` selects, returning them.
    pub fn remove_where(&mut self, filtered: impl Fn(PieceIndex) -> bool) -> Vec<PieceIndex> {
        let mut removed = Vec::new();
        self.pieces.retain(|p| {
            if filtered(p.piece) {
                removed.push(p.piece);
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear(&mut self) -> Vec<PieceIndex> {
        self.pieces.drain(..).map(|p| p.piece).collect()
    }

    /// Issues block requests for the queued pieces.
    ///
    /// Returns the connections that received new requests; their requests
    /// have already been flushed.
    pub fn request_blocks(
        &mut self,
        now: Instant,
        limits: RequestLimits,
        picker: &mut dyn PiecePicker,
        connections: &mut BTreeMap<ConnectionId, Box<dyn PeerConnection>>,
    ) -> BTreeSet<ConnectionId> {
        let mut peers: Vec<ConnectionId> = connections
            .iter()
            .filter(|(_, c)| c.can_request_time_critical())
            .map(|(&id, _)| id)
            .collect();
        sort_by_queue_time(&mut peers, connections);

        // The slowest tenth tends to stall whole pieces
        let keep = (peers.len() * 9 + 9) / 10;
        peers.truncate(keep);

        let mut with_requests = BTreeSet::new();
        let horizon = self.estimator.horizon(limits.horizon_margin);
        let estimator = self.estimator;

        for (position, entry) in self.pieces.iter_mut().enumerate() {
            if peers.is_empty() {
                break;
            }
            if position > 0 && entry.deadline > now + horizon {
                tracing::trace!(piece = %entry.piece, "Reached time-critical horizon");
                break;
            }
            if picker.have_piece(entry.piece) {
                continue;
            }

            let blocks_in_piece = picker.blocks_in_piece(entry.piece);
            let (finished, writing, requested) = match picker.downloading_piece(entry.piece) {
                Some(dp) => (dp.num_finished(), dp.num_writing(), dp.num_requested()),
                None => (0, 0, 0),
            };
            let free = blocks_in_piece.saturating_sub(finished + writing + requested);

            let mut timed_out = 0;
            if free == 0 {
                let last = *entry.last_requested.get_or_insert(now);
                timed_out = estimator.timeouts(now, last);
                // Everything is requested and nothing looks stalled
                if requested == 0 || timed_out == 0 {
                    continue;
                }
            }

            let mut ignored = Vec::new();
            pick_piece_blocks(
                now,
                entry,
                timed_out,
                &mut peers,
                &mut ignored,
                &mut with_requests,
                picker,
                connections,
                limits.max_queue_time,
            );

            if !ignored.is_empty() {
                peers.extend(ignored);
                sort_by_queue_time(&mut peers, connections);
            }
            if queue_saturated(&peers, connections, limits.max_queue_time) {
                break;
            }
        }

        for id in &with_requests {
            if let Some(connection) = connections.get_mut(id) {
                connection.send_block_requests();
            }
        }
        with_requests
    }
}

fn queue_time(id: ConnectionId, connections: &BTreeMap<ConnectionId, Box<dyn PeerConnection>>) -> Duration {
    connections
        .get(&id)
        .map_or(Duration::MAX, |c| c.download_queue_time(BLOCK_SIZE))
}

fn sort_by_queue_time(peers: &mut [ConnectionId], connections: &BTreeMap<ConnectionId, Box<dyn PeerConnection>>) {
    peers.sort_by_key(|&id| queue_time(id, connections));
}

fn queue_saturated(
    peers: &[ConnectionId],
    connections: &BTreeMap<ConnectionId, Box<dyn PeerConnection>>,
    max_queue_time: Duration,
) -> bool {
    peers.first().is_some_and(|&id| {
        connections
            .get(&id)
            .is_some_and(|c| c.download_queue_time(0) > max_queue_time)
    })
}

/// Free blocks of `piece` the peer can serve, or stalled blocks in busy
/// mode, fewest outstanding requests first.
fn candidate_blocks(
    picker: &dyn PiecePicker,
    piece: PieceIndex,
    timed_out: u32,
) -> (Vec<BlockRef>, bool) {
    let blocks_in_piece = picker.blocks_in_piece(piece);
    let Some(dp) = picker.downloading_piece(piece) else {
        return ((0..blocks_in_piece).map(|b| BlockRef::new(piece, b)).collect(), false);
    };

    let free: Vec<BlockRef> = dp
        .blocks
        .iter()
        .enumerate()
        .filter(|(_, info)| info.state == BlockState::Open)
        .map(|(b, _)| BlockRef::new(piece, b as u32))
        .collect();
    if !free.is_empty() || timed_out == 0 {
        return (free, false);
    }

    let mut busy: Vec<(u32, u32)> = dp
        .blocks
        .iter()
        .enumerate()
        .filter(|(_, info)| info.state == BlockState::Requested && info.num_peers <= timed_out)
        .map(|(b, info)| (info.num_peers, b as u32))
        .collect();
    busy.sort();
    (busy.into_iter().map(|(_, b)| BlockRef::new(piece, b)).collect(), true)
}

#[allow(clippy::too_many_arguments)]
fn pick_piece_blocks(
    now: Instant,
    entry: &mut TimeCriticalPiece,
    timed_out: u32,
    peers: &mut Vec<ConnectionId>,
    ignored: &mut Vec<ConnectionId>,
    with_requests: &mut BTreeSet<ConnectionId>,
    picker: &mut dyn PiecePicker,
    connections: &mut BTreeMap<ConnectionId, Box<dyn PeerConnection>>,
    max_queue_time: Duration,
) {
    loop {
        if queue_saturated(peers, connections, max_queue_time) {
            break;
        }
        let Some(pos) = peers.iter().position(|id| {
            connections
                .get(id)
                .is_some_and(|c| c.has_piece(entry.piece))
        }) else {
            break;
        };
        let id = peers[pos];
        let Some(connection) = connections.get_mut(&id) else {
            peers.remove(pos);
            continue;
        };

        let (blocks, busy) = candidate_blocks(&*picker, entry.piece, timed_out);
        let Some(&block) = blocks.first() else {
            break;
        };

        // A stalled block already on this peer's wire is likely its fault
        if connection.download_queue().iter().any(|p| p.block == block) {
            ignored.push(peers.remove(pos));
            continue;
        }

        if connection.request_queue().iter().any(|p| p.block == block) {
            if !connection.make_time_critical(block) {
                ignored.push(peers.remove(pos));
                continue;
            }
            entry.last_requested = Some(now);
        } else {
            let flags = RequestFlags {
                time_critical: true,
                busy,
            };
            if !connection.add_request(block, flags) {
                ignored.push(peers.remove(pos));
                continue;
            }
            picker.mark_as_downloading(block, connection.peer());
            if !busy {
                entry.last_requested = Some(now);
            }
        }
        with_requests.insert(id);
        entry.peers += 1;
        entry.first_requested.get_or_insert(now);

        if !connection.can_request_time_critical() {
            peers.remove(pos);
            continue;
        }

        // The peer's queue grew, move it back into order
        let mut pos = pos;
        while pos + 1 < peers.len()
            && queue_time(peers[pos], connections) > queue_time(peers[pos + 1], connections)
        {
            peers.swap(pos, pos + 1);
            pos += 1;
        }

        // Busy mode re-requests each stalled block at most once per pass
        if busy {
            break;
        }
    }
}
