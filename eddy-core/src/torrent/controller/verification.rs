use std::collections::BTreeSet;
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use super::{JobContext, PieceRead, Torrent};
use crate::torrent::alerts::Alert;
use crate::torrent::connection::{ConnectionId, DisconnectReason};
use crate::torrent::disk::{DiskError, DiskErrorKind, DiskJob};
use crate::torrent::peer_list::PeerHandle;
use crate::torrent::peer_list::peer::MIN_TRUST_POINTS;
use crate::torrent::picker::{BLOCK_SIZE, BlockRef, TOP_PRIORITY};
use crate::torrent::{PieceIndex, TorrentError, TorrentErrorCode, TorrentState};

impl Torrent {
    /// A peer delivered a block. Queues the write unless the block is
    /// already had or being written.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MetadataMissing` - If there is no layout yet
    /// - `TorrentError::InvalidPieceIndex` - If the block's piece is out of range
    pub fn on_block_received(
        &mut self,
        id: ConnectionId,
        block: BlockRef,
        data: Bytes,
    ) -> Result<(), TorrentError> {
        self.check_piece_index(block.piece)?;
        let length = data.len() as u64;
        let peer = self.connections.get(&id).and_then(|c| c.peer());

        let accepted = match self.picker.as_mut() {
            Some(picker) if !picker.have_piece(block.piece) => picker.mark_as_writing(block, peer),
            _ => false,
        };
        if !accepted || self.upload_mode {
            self.counters.redundant_bytes += length;
            if accepted {
                if let Some(picker) = self.picker.as_mut() {
                    picker.write_failed(block);
                }
            }
            return Ok(());
        }

        self.counters.downloaded += length;
        if let Some(handle) = peer {
            if let Some(entry) = self.peers.get_mut(handle) {
                entry.total_downloaded += length;
            }
        }
        self.submit(
            DiskJob::Write { block, data },
            JobContext {
                origin: Some(id),
                peer,
                checking: false,
            },
        );
        Ok(())
    }

    /// Writes a whole piece supplied by the user.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MetadataMissing` - If there is no layout yet
    /// - `TorrentError::InvalidPieceIndex` - If the piece is out of range
    /// - `TorrentError::InvalidState` - If the data does not match the piece size
    pub fn add_piece(&mut self, piece: PieceIndex, data: Bytes) -> Result<(), TorrentError> {
        self.check_piece_index(piece)?;
        let Some(layout) = &self.layout else {
            return Err(TorrentError::MetadataMissing);
        };
        if data.len() != layout.piece_size(piece) as usize {
            return Err(TorrentError::InvalidState { state: self.state });
        }
        let num_blocks = layout.blocks_in_piece(piece);

        let mut writes = Vec::with_capacity(num_blocks as usize);
        if let Some(picker) = self.picker.as_mut() {
            if picker.have_piece(piece) {
                return Ok(());
            }
            for index in 0..num_blocks {
                let block = BlockRef::new(piece, index);
                if picker.mark_as_writing(block, None) {
                    let start = (index * BLOCK_SIZE) as usize;
                    let end = (start + BLOCK_SIZE as usize).min(data.len());
                    writes.push((block, data.slice(start..end)));
                }
            }
        }
        for (block, data) in writes {
            self.submit_plain(DiskJob::Write { block, data });
        }
        Ok(())
    }

    pub(super) fn on_disk_write_complete(
        &mut self,
        block: BlockRef,
        context: JobContext,
        error: Option<DiskError>,
        now: Instant,
    ) {
        let Some(picker) = self.picker.as_mut() else {
            return;
        };
        if let Some(error) = error {
            picker.write_failed(block);
            self.handle_disk_error(error, context.origin, now);
            return;
        }
        if !picker.mark_as_finished(block, context.peer) {
            return;
        }
        if !picker.is_piece_finished(block.piece) {
            return;
        }
        picker.set_hashing(block.piece, true);
        tracing::trace!(info_hash = %self.info_hash, piece = %block.piece, "Piece complete, hashing");
        self.submit_plain(DiskJob::Hash { piece: block.piece });
    }

    pub(super) fn on_piece_hashed(
        &mut self,
        piece: PieceIndex,
        digest: [u8; 20],
        error: Option<DiskError>,
        now: Instant,
    ) {
        if let Some(error) = error {
            if let Some(picker) = self.picker.as_mut() {
                picker.restore_piece(piece);
            }
            self.handle_disk_error(error, None, now);
            return;
        }
        let Some(picker) = self.picker.as_ref() else {
            return;
        };
        // The piece may have been restored or passed meanwhile
        if picker.have_piece(piece) || !picker.is_piece_finished(piece) {
            return;
        }
        let expected = self.layout.as_ref().and_then(|l| l.piece_hash(piece));
        if expected == Some(&digest) {
            self.piece_passed(piece, now);
        } else {
            self.piece_failed(piece, now);
        }
    }

    /// Distinct peers that contributed blocks to a piece.
    fn contributors(&self, piece: PieceIndex) -> BTreeSet<PeerHandle> {
        self.picker
            .as_ref()
            .map(|p| p.downloaders(piece).into_iter().flatten().collect())
            .unwrap_or_default()
    }

    fn connection_of(&self, handle: PeerHandle) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, c)| c.peer() == Some(handle))
            .map(|(&id, _)| id)
    }

    pub(super) fn piece_passed(&mut self, piece: PieceIndex, now: Instant) {
        tracing::debug!(info_hash = %self.info_hash, %piece, "Piece passed hash check");
        for handle in self.contributors(piece) {
            if let Some(peer) = self.peers.get_mut(handle) {
                peer.reward();
            }
            if let Some(id) = self.connection_of(handle) {
                if let Some(connection) = self.connections.get_mut(&id) {
                    connection.received_valid_data(piece);
                }
            }
        }

        if let Some(picker) = self.picker.as_mut() {
            picker.piece_passed(piece);
        }
        self.time_critical.remove(piece, true, now);

        let was_predicted = match self.predictive.binary_search(&piece) {
            Ok(pos) => {
                self.predictive.remove(pos);
                true
            }
            Err(_) => false,
        };
        if !was_predicted {
            for connection in self.connections.values_mut() {
                connection.announce_piece(piece);
            }
        }
        for connection in self.connections.values_mut() {
            connection.update_interest();
        }

        self.post(Alert::PieceFinished {
            info_hash: self.info_hash,
            piece,
        });
        self.need_save_resume = true;
        self.update_sparse_neighbours(piece);

        if self.read_when_available.remove(&piece) {
            if let Err(e) = self.read_piece(piece) {
                tracing::warn!(info_hash = %self.info_hash, %piece, error = %e, "Deferred piece read failed");
            }
        }

        if self.is_finished()
            && !matches!(self.state, TorrentState::Finished | TorrentState::Seeding)
        {
            self.finished(now);
        }
    }

    /// Raises the priority of missing pieces next to a passed one while the
    /// have-set is more fragmented than allowed.
    fn update_sparse_neighbours(&mut self, piece: PieceIndex) {
        let max_regions = self.config.swarm.max_sparse_regions;
        let Some(picker) = self.picker.as_mut() else {
            return;
        };
        if max_regions == 0 || picker.sparse_regions() as usize <= max_regions {
            return;
        }
        let num_pieces = picker.num_pieces();
        let neighbours = [piece.as_u32().checked_sub(1), piece.as_u32().checked_add(1)];
        for index in neighbours.into_iter().flatten().filter(|&i| i < num_pieces) {
            let candidate = PieceIndex::new(index);
            if picker.have_piece(candidate) || picker.piece_priority(candidate) == 0 {
                continue;
            }
            let have_before = index == 0 || picker.have_piece(PieceIndex::new(index - 1));
            let have_after = index + 1 == num_pieces || picker.have_piece(PieceIndex::new(index + 1));
            let priority = match (have_before, have_after) {
                (true, true) => TOP_PRIORITY,
                (true, false) | (false, true) => TOP_PRIORITY - 1,
                (false, false) => continue,
            };
            picker.set_piece_priority(candidate, priority);
        }
    }

    pub(super) fn piece_failed(&mut self, piece: PieceIndex, now: Instant) {
        let piece_size = self
            .layout
            .as_ref()
            .map_or(0, |l| u64::from(l.piece_size(piece)));
        tracing::warn!(info_hash = %self.info_hash, %piece, "Piece failed hash check");
        self.post(Alert::HashFailed {
            info_hash: self.info_hash,
            piece,
        });
        self.counters.failed_bytes += piece_size;

        let contributors = self.contributors(piece);
        let single_peer = contributors.len() == 1;
        let use_parole = self.config.swarm.use_parole_mode;

        for handle in contributors {
            let Some(peer) = self.peers.get_mut(handle) else {
                continue;
            };
            let trust = peer.penalize();
            if use_parole {
                peer.on_parole = true;
            }
            let endpoint = peer.endpoint().clone();

            let connection = self.connection_of(handle);
            let allow_disconnect = connection
                .and_then(|id| self.connections.get_mut(&id))
                .is_none_or(|c| c.received_invalid_data(piece, single_peer));

            if trust <= MIN_TRUST_POINTS || (single_peer && allow_disconnect) {
                tracing::info!(
                    info_hash = %self.info_hash,
                    peer = %endpoint,
                    trust,
                    "Banning peer for sending corrupt data"
                );
                self.peers.ban_peer(handle);
                self.post(Alert::PeerBanned {
                    info_hash: self.info_hash,
                    endpoint,
                });
                if let Some(id) = connection {
                    self.close_connection(id, DisconnectReason::HashFailure, now);
                }
            }
        }

        self.time_critical.remove(piece, false, now);
        if let Ok(pos) = self.predictive.binary_search(&piece) {
            self.predictive.remove(pos);
            for connection in self.connections.values_mut() {
                connection.send_dont_have(piece);
            }
        }

        if let Some(picker) = self.picker.as_mut() {
            picker.restore_piece(piece);
        }
        for connection in self.connections.values_mut() {
            connection.update_interest();
        }
    }

    /// Hash result of a full file check.
    pub(super) fn on_piece_checked(
        &mut self,
        piece: PieceIndex,
        digest: [u8; 20],
        error: Option<DiskError>,
        now: Instant,
    ) {
        if self.state != TorrentState::CheckingFiles {
            return;
        }
        self.checking_remaining = self.checking_remaining.saturating_sub(1);

        let passed = match error {
            None => self
                .layout
                .as_ref()
                .and_then(|l| l.piece_hash(piece))
                .is_some_and(|expected| *expected == digest),
            // Missing files just mean missing pieces
            Some(e) if e.kind == DiskErrorKind::NotFound => false,
            Some(e) => {
                self.checking_remaining = 0;
                self.handle_disk_error(e, None, now);
                return;
            }
        };
        if let Some(picker) = self.picker.as_mut() {
            if passed {
                picker.we_have(piece);
            } else {
                picker.we_dont_have(piece);
            }
        }

        if self.checking_remaining == 0 {
            tracing::info!(info_hash = %self.info_hash, have = self.num_have(), "File check complete");
            self.files_checked(now);
        }
    }

    /// Applies the disk failure policy.
    ///
    /// Out of memory only drops the connection that triggered the job. Write
    /// failures from lack of space or permission switch to upload mode.
    /// Anything else stores the error and pauses the torrent.
    pub(super) fn handle_disk_error(
        &mut self,
        error: DiskError,
        origin: Option<ConnectionId>,
        now: Instant,
    ) {
        tracing::warn!(info_hash = %self.info_hash, %error, "Disk error");
        if error.is_out_of_memory() {
            if let Some(id) = origin {
                self.close_connection(id, DisconnectReason::OutOfMemory, now);
            }
            return;
        }

        self.post(Alert::FileError {
            info_hash: self.info_hash,
            error: error.clone(),
        });
        if error.allows_upload_mode() {
            self.set_upload_mode(true);
            return;
        }
        self.set_error(TorrentErrorCode::Disk(error), now);
        self.pause(false, now);
    }

    /// Stops or resumes downloading while uploading goes on.
    pub fn set_upload_mode(&mut self, upload_mode: bool) {
        if self.upload_mode == upload_mode {
            return;
        }
        tracing::info!(info_hash = %self.info_hash, upload_mode, "Upload mode changed");
        self.upload_mode = upload_mode;
        self.need_save_resume = true;
        self.post(Alert::UploadModeChanged {
            info_hash: self.info_hash,
            upload_mode,
        });

        if upload_mode {
            for connection in self.connections.values_mut() {
                let peer = connection.peer();
                for pending in connection.request_queue() {
                    connection.cancel_request(pending.block);
                    if let Some(picker) = self.picker.as_mut() {
                        picker.abort_download(pending.block, peer);
                    }
                }
            }
        }
        for connection in self.connections.values_mut() {
            connection.update_interest();
        }
        self.send_upload_only();
    }

    /// Tells every peer whether we are done downloading.
    pub(super) fn send_upload_only(&mut self) {
        let upload_only = self.upload_mode || (self.is_finished() && !self.share_mode);
        for connection in self.connections.values_mut() {
            connection.send_upload_only(upload_only);
        }
    }

    /// Announces a piece to peers before its write is durable.
    ///
    /// The piece stays out of our have-set until it passes; if it fails,
    /// peers receive a "don't have".
    pub fn predicted_have_piece(&mut self, piece: PieceIndex) {
        if !self.valid_piece(piece) || self.have_piece(piece) {
            return;
        }
        let Err(pos) = self.predictive.binary_search(&piece) else {
            return;
        };
        self.predictive.insert(pos, piece);
        for connection in self.connections.values_mut() {
            connection.announce_piece(piece);
        }
    }

    pub fn predictive_pieces(&self) -> &[PieceIndex] {
        &self.predictive
    }

    /// Reads a piece back from disk. The data arrives as an
    /// [`Alert::ReadPiece`].
    ///
    /// # Errors
    ///
    /// - `TorrentError::MetadataMissing` - If there is no layout yet
    /// - `TorrentError::InvalidPieceIndex` - If the piece is out of range
    /// - `TorrentError::PieceNotAvailable` - If we do not have the piece
    pub fn read_piece(&mut self, piece: PieceIndex) -> Result<(), TorrentError> {
        self.check_piece_index(piece)?;
        if !self.have_piece(piece) {
            return Err(TorrentError::PieceNotAvailable { index: piece });
        }
        if self.piece_reads.contains_key(&piece) {
            return Ok(());
        }
        let Some(layout) = &self.layout else {
            return Err(TorrentError::MetadataMissing);
        };
        let num_blocks = layout.blocks_in_piece(piece);
        let lengths: Vec<u32> = (0..num_blocks).map(|b| layout.block_size(piece, b)).collect();
        self.piece_reads.insert(
            piece,
            PieceRead {
                blocks: vec![None; num_blocks as usize],
                remaining: num_blocks,
            },
        );
        for (index, length) in lengths.into_iter().enumerate() {
            self.submit_plain(DiskJob::Read {
                block: BlockRef::new(piece, index as u32),
                length,
            });
        }
        Ok(())
    }

    pub(super) fn on_disk_read_complete(
        &mut self,
        block: BlockRef,
        data: Bytes,
        error: Option<DiskError>,
        now: Instant,
    ) {
        if let Some(error) = error {
            if self.piece_reads.remove(&block.piece).is_some() {
                self.post(Alert::ReadPieceFailed {
                    info_hash: self.info_hash,
                    piece: block.piece,
                    error: error.clone(),
                });
            }
            self.handle_disk_error(error, None, now);
            return;
        }

        let Some(read) = self.piece_reads.get_mut(&block.piece) else {
            return;
        };
        let Some(slot) = read.blocks.get_mut(block.block as usize) else {
            return;
        };
        if slot.is_none() {
            *slot = Some(data);
            read.remaining -= 1;
        }
        if read.remaining > 0 {
            return;
        }

        let Some(read) = self.piece_reads.remove(&block.piece) else {
            return;
        };
        let mut buffer = BytesMut::new();
        for chunk in read.blocks.into_iter().flatten() {
            buffer.extend_from_slice(&chunk);
        }
        self.post(Alert::ReadPiece {
            info_hash: self.info_hash,
            piece: block.piece,
            data: buffer.freeze(),
        });
    }
}
