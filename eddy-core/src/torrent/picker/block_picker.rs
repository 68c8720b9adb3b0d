//! In-memory block picker.

use std::collections::BTreeMap;

use super::{
    BlockRef, BlockState, DEFAULT_PRIORITY, DONT_DOWNLOAD, DownloadingPiece, PiecePicker,
    PieceStats, TOP_PRIORITY,
};
use crate::torrent::PieceIndex;
use crate::torrent::peer_list::PeerHandle;

#[derive(Debug, Clone, Copy)]
struct PieceEntry {
    have: bool,
    priority: u8,
    peer_count: u32,
}

/// Tracks have/priority/availability per piece and block state for
/// pieces in progress.
#[derive(Debug)]
pub struct BlockPicker {
    blocks_per_piece: u32,
    blocks_in_last_piece: u32,
    pieces: Vec<PieceEntry>,
    downloading: BTreeMap<PieceIndex, DownloadingPiece>,
    num_have: u32,
    num_filtered: u32,
    num_have_filtered: u32,
}

impl BlockPicker {
    /// Creates a picker where every piece is missing at default priority.
    pub fn new(num_pieces: u32, blocks_per_piece: u32, blocks_in_last_piece: u32) -> Self {
        Self {
            blocks_per_piece,
            blocks_in_last_piece,
            pieces: vec![
                PieceEntry {
                    have: false,
                    priority: DEFAULT_PRIORITY,
                    peer_count: 0,
                };
                num_pieces as usize
            ],
            downloading: BTreeMap::new(),
            num_have: 0,
            num_filtered: 0,
            num_have_filtered: 0,
        }
    }

    fn entry(&self, piece: PieceIndex) -> Option<&PieceEntry> {
        self.pieces.get(piece.as_usize())
    }

    fn block_slot(&mut self, block: BlockRef) -> Option<&mut super::BlockInfo> {
        if self.entry(block.piece)?.have || block.block >= self.blocks_in_piece(block.piece) {
            return None;
        }
        let num_blocks = self.blocks_in_piece(block.piece);
        let piece = self
            .downloading
            .entry(block.piece)
            .or_insert_with(|| DownloadingPiece::new(block.piece, num_blocks));
        piece.blocks.get_mut(block.block as usize)
    }

    fn drop_if_idle(&mut self, piece: PieceIndex) {
        if self.downloading.get(&piece).is_some_and(|p| p.is_idle()) {
            self.downloading.remove(&piece);
        }
    }
}

impl PiecePicker for BlockPicker {
    fn num_pieces(&self) -> u32 {
        self.pieces.len() as u32
    }

    fn blocks_in_piece(&self, piece: PieceIndex) -> u32 {
        if piece.as_usize() + 1 == self.pieces.len() {
            self.blocks_in_last_piece
        } else {
            self.blocks_per_piece
        }
    }

    fn have_piece(&self, piece: PieceIndex) -> bool {
        self.entry(piece).is_some_and(|e| e.have)
    }

    fn num_have(&self) -> u32 {
        self.num_have
    }

    fn num_filtered(&self) -> u32 {
        self.num_filtered
    }

    fn num_have_filtered(&self) -> u32 {
        self.num_have_filtered
    }

    fn we_have(&mut self, piece: PieceIndex) {
        let Some(entry) = self.pieces.get_mut(piece.as_usize()) else {
            return;
        };
        if entry.have {
            return;
        }
        entry.have = true;
        if entry.priority == DONT_DOWNLOAD {
            self.num_filtered -= 1;
            self.num_have_filtered += 1;
        }
        self.num_have += 1;
        self.downloading.remove(&piece);
    }

    fn we_dont_have(&mut self, piece: PieceIndex) {
        let Some(entry) = self.pieces.get_mut(piece.as_usize()) else {
            return;
        };
        if !entry.have {
            self.downloading.remove(&piece);
            return;
        }
        entry.have = false;
        if entry.priority == DONT_DOWNLOAD {
            self.num_have_filtered -= 1;
            self.num_filtered += 1;
        }
        self.num_have -= 1;
    }

    fn piece_passed(&mut self, piece: PieceIndex) {
        self.we_have(piece);
    }

    fn restore_piece(&mut self, piece: PieceIndex) {
        self.downloading.remove(&piece);
    }

    fn piece_priority(&self, piece: PieceIndex) -> u8 {
        self.entry(piece).map_or(DONT_DOWNLOAD, |e| e.priority)
    }

    fn set_piece_priority(&mut self, piece: PieceIndex, priority: u8) -> bool {
        let priority = priority.min(TOP_PRIORITY);
        let Some(entry) = self.pieces.get_mut(piece.as_usize()) else {
            return false;
        };
        if entry.priority == priority {
            return false;
        }
        let was_filtered = entry.priority == DONT_DOWNLOAD;
        let filtered = priority == DONT_DOWNLOAD;
        entry.priority = priority;
        if was_filtered == filtered {
            return false;
        }

        match (filtered, entry.have) {
            (true, true) => self.num_have_filtered += 1,
            (true, false) => self.num_filtered += 1,
            (false, true) => self.num_have_filtered -= 1,
            (false, false) => self.num_filtered -= 1,
        }
        true
    }

    fn is_piece_finished(&self, piece: PieceIndex) -> bool {
        self.downloading
            .get(&piece)
            .is_some_and(|p| p.blocks.iter().all(|b| b.state == BlockState::Finished))
    }

    fn mark_as_downloading(&mut self, block: BlockRef, peer: Option<PeerHandle>) -> bool {
        let Some(info) = self.block_slot(block) else {
            return false;
        };
        match info.state {
            BlockState::Open => {
                info.state = BlockState::Requested;
                info.peer = peer;
                info.num_peers = 1;
                true
            }
            BlockState::Requested => {
                info.num_peers += 1;
                true
            }
            BlockState::Writing | BlockState::Finished => false,
        }
    }

    fn mark_as_writing(&mut self, block: BlockRef, peer: Option<PeerHandle>) -> bool {
        let Some(info) = self.block_slot(block) else {
            return false;
        };
        match info.state {
            BlockState::Open | BlockState::Requested => {
                info.state = BlockState::Writing;
                info.peer = peer;
                info.num_peers = 0;
                true
            }
            BlockState::Writing | BlockState::Finished => false,
        }
    }

    fn mark_as_finished(&mut self, block: BlockRef, peer: Option<PeerHandle>) -> bool {
        let Some(info) = self.block_slot(block) else {
            return false;
        };
        if info.state == BlockState::Finished {
            return false;
        }
        info.state = BlockState::Finished;
        if peer.is_some() {
            info.peer = peer;
        }
        info.num_peers = 0;
        true
    }

    fn write_failed(&mut self, block: BlockRef) {
        if let Some(piece) = self.downloading.get_mut(&block.piece) {
            if let Some(info) = piece.blocks.get_mut(block.block as usize) {
                if info.state == BlockState::Writing {
                    *info = Default::default();
                }
            }
            piece.hashing = false;
        }
        self.drop_if_idle(block.piece);
    }

    fn abort_download(&mut self, block: BlockRef, peer: Option<PeerHandle>) {
        let Some(piece) = self.downloading.get_mut(&block.piece) else {
            return;
        };
        let Some(info) = piece.blocks.get_mut(block.block as usize) else {
            return;
        };
        if info.state != BlockState::Requested {
            return;
        }
        info.num_peers = info.num_peers.saturating_sub(1);
        if info.num_peers == 0 {
            *info = Default::default();
        } else if info.peer == peer {
            info.peer = None;
        }
        self.drop_if_idle(block.piece);
    }

    fn set_hashing(&mut self, piece: PieceIndex, hashing: bool) {
        if let Some(p) = self.downloading.get_mut(&piece) {
            p.hashing = hashing;
        }
    }

    fn downloaders(&self, piece: PieceIndex) -> Vec<Option<PeerHandle>> {
        match self.downloading.get(&piece) {
            Some(p) => p.blocks.iter().map(|b| b.peer).collect(),
            None => vec![None; self.blocks_in_piece(piece) as usize],
        }
    }

    fn clear_peer(&mut self, peer: PeerHandle) {
        for piece in self.downloading.values_mut() {
            for info in &mut piece.blocks {
                if info.peer == Some(peer) {
                    info.peer = None;
                }
            }
        }
    }

    fn has_peer_reference(&self, peer: PeerHandle) -> bool {
        self.downloading
            .values()
            .any(|p| p.blocks.iter().any(|b| b.peer == Some(peer)))
    }

    fn inc_refcount(&mut self, piece: PieceIndex, _peer: PeerHandle) {
        if let Some(entry) = self.pieces.get_mut(piece.as_usize()) {
            entry.peer_count += 1;
        }
    }

    fn dec_refcount(&mut self, piece: PieceIndex, _peer: PeerHandle) {
        if let Some(entry) = self.pieces.get_mut(piece.as_usize()) {
            entry.peer_count = entry.peer_count.saturating_sub(1);
        }
    }

    fn piece_stats(&self, piece: PieceIndex) -> PieceStats {
        match self.entry(piece) {
            Some(e) => PieceStats {
                peer_count: e.peer_count,
                priority: e.priority,
                have: e.have,
                downloading: self.downloading.contains_key(&piece),
            },
            None => PieceStats {
                peer_count: 0,
                priority: DONT_DOWNLOAD,
                have: false,
                downloading: false,
            },
        }
    }

    fn download_queue(&self) -> Vec<DownloadingPiece> {
        self.downloading.values().cloned().collect()
    }

    fn downloading_piece(&self, piece: PieceIndex) -> Option<&DownloadingPiece> {
        self.downloading.get(&piece)
    }

    fn sparse_regions(&self) -> u32 {
        let mut regions = 0;
        let mut previous = false;
        for entry in &self.pieces {
            if entry.have && !previous {
                regions += 1;
            }
            previous = entry.have;
        }
        regions
    }
}
