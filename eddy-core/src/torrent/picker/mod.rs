//! Piece availability and block bookkeeping.
//!
//! The controller drives the picker through the [`PiecePicker`] trait;
//! [`BlockPicker`] is the in-memory implementation used by default.

mod block_picker;

pub use block_picker::BlockPicker;

use super::PieceIndex;
use super::peer_list::PeerHandle;

/// Size of a requested block in bytes.
pub const BLOCK_SIZE: u32 = 16 * 1024;
/// Priority of a piece that must not be downloaded.
pub const DONT_DOWNLOAD: u8 = 0;
pub const DEFAULT_PRIORITY: u8 = 4;
pub const TOP_PRIORITY: u8 = 7;

/// A block within a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRef {
    pub piece: PieceIndex,
    pub block: u32,
}

impl BlockRef {
    pub fn new(piece: PieceIndex, block: u32) -> Self {
        Self { piece, block }
    }
}

/// Progress of a single block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockState {
    #[default]
    Open,
    Requested,
    Writing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockInfo {
    pub state: BlockState,
    /// Last peer that sent or was asked for this block
    pub peer: Option<PeerHandle>,
    /// Peers with an outstanding request for this block
    pub num_peers: u32,
}

/// A piece with at least one block in flight or done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadingPiece {
    pub index: PieceIndex,
    pub blocks: Vec<BlockInfo>,
    /// Set once the piece is complete and queued for hashing
    pub hashing: bool,
}

impl DownloadingPiece {
    pub fn new(index: PieceIndex, num_blocks: u32) -> Self {
        Self {
            index,
            blocks: vec![BlockInfo::default(); num_blocks as usize],
            hashing: false,
        }
    }

    fn count(&self, state: BlockState) -> u32 {
        self.blocks.iter().filter(|b| b.state == state).count() as u32
    }

    pub fn num_finished(&self) -> u32 {
        self.count(BlockState::Finished)
    }

    pub fn num_writing(&self) -> u32 {
        self.count(BlockState::Writing)
    }

    pub fn num_requested(&self) -> u32 {
        self.count(BlockState::Requested)
    }

    /// True when no block has any progress left to track.
    pub fn is_idle(&self) -> bool {
        self.blocks.iter().all(|b| b.state == BlockState::Open)
    }
}

/// Availability and priority of one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceStats {
    /// Connected peers that have the piece
    pub peer_count: u32,
    pub priority: u8,
    pub have: bool,
    pub downloading: bool,
}

/// Block-level download state the controller reads and mutates.
///
/// Every method taking a piece expects an index below
/// [`PiecePicker::num_pieces`]; out of range indices are ignored or
/// answered with a neutral value.
pub trait PiecePicker: Send {
    fn num_pieces(&self) -> u32;
    fn blocks_in_piece(&self, piece: PieceIndex) -> u32;

    fn have_piece(&self, piece: PieceIndex) -> bool;
    fn num_have(&self) -> u32;
    /// Pieces with priority zero that we do not have.
    fn num_filtered(&self) -> u32;
    /// Pieces with priority zero that we have anyway.
    fn num_have_filtered(&self) -> u32;

    /// Every wanted piece is done.
    fn is_finished(&self) -> bool {
        self.num_have() - self.num_have_filtered() + self.num_filtered() >= self.num_pieces()
    }

    /// Every piece is done.
    fn is_seed(&self) -> bool {
        self.num_have() == self.num_pieces()
    }

    /// Marks a piece as had without touching its blocks' history.
    fn we_have(&mut self, piece: PieceIndex);
    fn we_dont_have(&mut self, piece: PieceIndex);

    /// Records a piece that passed the hash check.
    fn piece_passed(&mut self, piece: PieceIndex);
    /// Makes every block of a piece requestable again.
    fn restore_piece(&mut self, piece: PieceIndex);

    fn piece_priority(&self, piece: PieceIndex) -> u8;
    /// Returns true if the piece moved in or out of the filtered set.
    fn set_piece_priority(&mut self, piece: PieceIndex, priority: u8) -> bool;

    /// All blocks are written.
    fn is_piece_finished(&self, piece: PieceIndex) -> bool;

    fn mark_as_downloading(&mut self, block: BlockRef, peer: Option<PeerHandle>) -> bool;
    fn mark_as_writing(&mut self, block: BlockRef, peer: Option<PeerHandle>) -> bool;
    /// Returns false if the block was already finished.
    fn mark_as_finished(&mut self, block: BlockRef, peer: Option<PeerHandle>) -> bool;
    fn write_failed(&mut self, block: BlockRef);
    fn abort_download(&mut self, block: BlockRef, peer: Option<PeerHandle>);
    fn set_hashing(&mut self, piece: PieceIndex, hashing: bool);

    /// Peer attributed to each block of a piece.
    fn downloaders(&self, piece: PieceIndex) -> Vec<Option<PeerHandle>>;
    /// Removes every reference to a peer.
    fn clear_peer(&mut self, peer: PeerHandle);
    fn has_peer_reference(&self, peer: PeerHandle) -> bool;

    fn inc_refcount(&mut self, piece: PieceIndex, peer: PeerHandle);
    fn dec_refcount(&mut self, piece: PieceIndex, peer: PeerHandle);

    fn piece_stats(&self, piece: PieceIndex) -> PieceStats;
    fn download_queue(&self) -> Vec<DownloadingPiece>;
    fn downloading_piece(&self, piece: PieceIndex) -> Option<&DownloadingPiece>;

    /// Number of contiguous runs of pieces we have.
    fn sparse_regions(&self) -> u32;
}
