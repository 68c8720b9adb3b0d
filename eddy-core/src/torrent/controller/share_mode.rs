//! Share mode: download only what can be uploaded again.
//!
//! Every piece starts filtered. Pieces are enabled one at a time, picking
//! among the rarest in the swarm, and only while uploads keep up with
//! downloads by the configured ratio.

use std::time::Instant;

use rand::Rng;
use rand::seq::SliceRandom;

use super::Torrent;
use crate::torrent::connection::DisconnectReason;
use crate::torrent::picker::DONT_DOWNLOAD;
use crate::torrent::PieceIndex;

/// Priority given to a piece share mode decided to download.
const SHARE_PRIORITY: u8 = 1;

impl Torrent {
    pub fn set_share_mode(&mut self, share_mode: bool, now: Instant) {
        if self.share_mode == share_mode {
            return;
        }
        tracing::info!(info_hash = %self.info_hash, share_mode, "Share mode changed");
        self.share_mode = share_mode;
        self.need_save_resume = true;
        for connection in self.connections.values_mut() {
            connection.send_share_mode(share_mode);
        }

        if share_mode {
            self.filter_for_share_mode();
            self.update_finished_state(now);
            self.recalc_share_mode(now);
        } else {
            self.update_piece_priorities(now);
        }
        self.send_upload_only();
        for connection in self.connections.values_mut() {
            connection.update_interest();
        }
    }

    /// Filters every piece we don't have.
    pub(super) fn filter_for_share_mode(&mut self) {
        let Some(picker) = self.picker.as_mut() else {
            return;
        };
        for piece in (0..picker.num_pieces()).map(PieceIndex::new) {
            if !picker.have_piece(piece) {
                picker.set_piece_priority(piece, DONT_DOWNLOAD);
            }
        }
    }

    /// Sheds surplus seeds and enables one more rare piece when the upload
    /// ratio allows it.
    pub(super) fn recalc_share_mode(&mut self, now: Instant) {
        if self.is_seed() || !self.files_checked {
            return;
        }
        let Some(num_pieces) = self.picker.as_ref().map(|p| p.num_pieces()) else {
            return;
        };

        let mut num_peers = 0usize;
        let mut num_downloaders = 0usize;
        let mut seeds = Vec::new();
        for (&id, connection) in &self.connections {
            if connection.is_connecting() {
                continue;
            }
            num_peers += 1;
            if connection.is_seed() {
                seeds.push(id);
                continue;
            }
            if connection.in_share_mode() {
                continue;
            }
            num_downloaders += 1;
        }
        if num_peers == 0 {
            return;
        }

        // Mostly seeds and many connections: seeds can't take anything from us
        let max_connections = self.max_connections.max(1);
        if seeds.len() * 100 / num_peers > 50
            && (num_peers * 100 / max_connections > 90 || num_peers > 20)
        {
            let to_disconnect = seeds.len().saturating_sub(num_peers / 2);
            seeds.shuffle(&mut self.rng);
            tracing::debug!(info_hash = %self.info_hash, to_disconnect, "Share mode dropping seeds");
            for id in seeds.into_iter().take(to_disconnect) {
                self.close_connection(id, DisconnectReason::UploadToUpload, now);
            }
        }
        if num_downloaders == 0 {
            return;
        }

        let target = u64::from(self.config.swarm.share_mode_target);
        let piece_length = self
            .layout
            .as_ref()
            .map_or(0, |l| u64::from(l.piece_length()));
        let uploaded = self.counters.uploaded;
        let Some(picker) = self.picker.as_mut() else {
            return;
        };

        let num_downloaded = picker.num_have().max(num_pieces - picker.num_filtered());
        if num_downloaded > 0 && u64::from(num_downloaded) * piece_length * target > uploaded {
            return;
        }
        // Keep parallel downloads under 5% of the pieces we already took
        if picker.download_queue().len() > num_downloaded as usize / 20 {
            return;
        }

        let mut rarest = Vec::new();
        let mut rarest_count = u32::MAX;
        for piece in (0..num_pieces).map(PieceIndex::new) {
            let stats = picker.piece_stats(piece);
            if stats.peer_count == 0 {
                continue;
            }
            if stats.priority == DONT_DOWNLOAD && (stats.have || stats.downloading) {
                picker.set_piece_priority(piece, SHARE_PRIORITY);
                continue;
            }
            if stats.priority != DONT_DOWNLOAD || stats.have {
                continue;
            }
            if stats.peer_count > rarest_count {
                continue;
            }
            if stats.peer_count < rarest_count {
                rarest.clear();
                rarest_count = stats.peer_count;
            }
            rarest.push(piece);
        }
        if rarest.is_empty() {
            return;
        }
        // Uploading a piece twice needs enough peers without it
        if (num_peers as u64).saturating_sub(u64::from(rarest_count)) < target {
            return;
        }

        let pick = rarest[self.rng.random_range(0..rarest.len())];
        picker.set_piece_priority(pick, SHARE_PRIORITY);
        tracing::debug!(info_hash = %self.info_hash, piece = %pick, peers = rarest_count, "Share mode picked piece");
        self.update_finished_state(now);
        for connection in self.connections.values_mut() {
            connection.update_interest();
        }
    }
}
