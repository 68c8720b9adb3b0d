use std::time::Instant;

use super::Torrent;
use crate::torrent::layout::TorrentLayout;
use crate::torrent::picker::{DEFAULT_PRIORITY, DONT_DOWNLOAD, TOP_PRIORITY};
use crate::torrent::time_critical::RequestLimits;
use crate::torrent::{FileIndex, PieceIndex, TorrentError, TorrentState};

/// Highest priority among the non-padding files overlapping a piece.
fn file_derived_priority(layout: &TorrentLayout, file_priorities: &[u8], piece: PieceIndex) -> u8 {
    layout
        .files_in_piece(piece)
        .into_iter()
        .filter(|&f| layout.file(f).is_some_and(|e| !e.pad))
        .map(|f| {
            file_priorities
                .get(f.0 as usize)
                .copied()
                .unwrap_or(DEFAULT_PRIORITY)
        })
        .max()
        .unwrap_or(DONT_DOWNLOAD)
}

impl Torrent {
    /// # Errors
    ///
    /// - `TorrentError::MetadataMissing` - If there is no layout yet
    /// - `TorrentError::InvalidFileIndex` - If the file is out of range
    pub fn set_file_priority(&mut self, file: FileIndex, priority: u8, now: Instant) -> Result<(), TorrentError> {
        self.check_file_index(file)?;
        let num_files = self.file_count();
        if self.file_priorities.len() < num_files {
            self.file_priorities.resize(num_files, DEFAULT_PRIORITY);
        }
        self.file_priorities[file.0 as usize] = priority.min(TOP_PRIORITY);
        self.need_save_resume = true;
        self.update_piece_priorities(now);
        Ok(())
    }

    /// Replaces all file priorities. Before metadata arrives they are kept
    /// and applied once the layout is known.
    pub fn prioritize_files(&mut self, priorities: Vec<u8>, now: Instant) {
        self.file_priorities = priorities.into_iter().map(|p| p.min(TOP_PRIORITY)).collect();
        if self.layout.is_some() {
            self.file_priorities.truncate(self.file_count());
            self.update_piece_priorities(now);
        }
        self.need_save_resume = true;
    }

    /// One priority per file, defaults filled in.
    pub fn file_priorities(&self) -> Vec<u8> {
        let mut priorities = self.file_priorities.clone();
        let num_files = self.file_count();
        if priorities.len() < num_files {
            priorities.resize(num_files, DEFAULT_PRIORITY);
        }
        priorities
    }

    /// # Errors
    ///
    /// - `TorrentError::MetadataMissing` - If there is no layout yet
    /// - `TorrentError::InvalidPieceIndex` - If the piece is out of range
    pub fn set_piece_priority(&mut self, piece: PieceIndex, priority: u8, now: Instant) -> Result<(), TorrentError> {
        self.check_piece_index(piece)?;
        let Some(picker) = self.picker.as_mut() else {
            return Ok(());
        };
        let priority = priority.min(TOP_PRIORITY);
        picker.set_piece_priority(piece, priority);
        if priority == DONT_DOWNLOAD {
            self.time_critical.remove(piece, false, now);
            self.read_when_available.remove(&piece);
        }
        self.need_save_resume = true;
        self.update_finished_state(now);
        Ok(())
    }

    /// # Errors
    ///
    /// - `TorrentError::MetadataMissing` - If there is no layout yet
    /// - `TorrentError::InvalidPieceIndex` - If the piece is out of range
    pub fn piece_priority(&self, piece: PieceIndex) -> Result<u8, TorrentError> {
        self.check_piece_index(piece)?;
        Ok(self
            .picker
            .as_ref()
            .map_or(DEFAULT_PRIORITY, |p| p.piece_priority(piece)))
    }

    pub fn piece_priorities(&self) -> Vec<u8> {
        let num_pieces = self.layout.as_ref().map_or(0, |l| l.num_pieces());
        (0..num_pieces)
            .map(|p| {
                self.picker
                    .as_ref()
                    .map_or(DEFAULT_PRIORITY, |picker| picker.piece_priority(PieceIndex::new(p)))
            })
            .collect()
    }

    /// Derives piece priorities from file priorities. Time-critical pieces
    /// keep their raised priority unless their files are filtered.
    pub(super) fn update_piece_priorities(&mut self, now: Instant) {
        let (Some(layout), Some(picker)) = (&self.layout, self.picker.as_mut()) else {
            return;
        };
        for piece in (0..layout.num_pieces()).map(PieceIndex::new) {
            let priority = file_derived_priority(layout, &self.file_priorities, piece);
            if priority != DONT_DOWNLOAD && self.time_critical.contains(piece) {
                continue;
            }
            picker.set_piece_priority(piece, priority);
        }

        let filtered = self
            .time_critical
            .remove_where(|p| picker.piece_priority(p) == DONT_DOWNLOAD);
        for piece in filtered {
            tracing::debug!(info_hash = %self.info_hash, %piece, "Filtered piece left the time-critical queue");
            self.read_when_available.remove(&piece);
        }
        self.update_finished_state(now);
    }

    /// Moves between downloading and finished after priorities changed.
    pub(super) fn update_finished_state(&mut self, now: Instant) {
        if !self.files_checked || self.picker.is_none() {
            return;
        }
        let was_finished = matches!(self.state, TorrentState::Finished | TorrentState::Seeding);
        let is_finished = self.is_finished();
        if is_finished && !was_finished && self.state == TorrentState::Downloading {
            self.finished(now);
        } else if !is_finished && was_finished {
            self.resume_download(now);
        }
    }

    /// Asks for a piece to arrive by `deadline`.
    ///
    /// With `alert_when_available` the piece is read back and posted as an
    /// alert once it passes, or right away if we already have it.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MetadataMissing` - If there is no layout yet
    /// - `TorrentError::InvalidPieceIndex` - If the piece is out of range
    pub fn set_piece_deadline(
        &mut self,
        piece: PieceIndex,
        deadline: Instant,
        alert_when_available: bool,
        now: Instant,
    ) -> Result<(), TorrentError> {
        self.check_piece_index(piece)?;
        if self.have_piece(piece) {
            if alert_when_available {
                self.read_piece(piece)?;
            }
            return Ok(());
        }
        let Some(picker) = self.picker.as_mut() else {
            return Ok(());
        };
        if alert_when_available {
            self.read_when_available.insert(piece);
        }
        picker.set_piece_priority(piece, TOP_PRIORITY);

        let first = self.time_critical.is_empty();
        if self.time_critical.set_deadline(piece, deadline) {
            // Requests already queued for this piece jump the line
            for connection in self.connections.values_mut() {
                for pending in connection
                    .download_queue()
                    .into_iter()
                    .chain(connection.request_queue())
                    .filter(|p| p.block.piece == piece)
                {
                    connection.make_time_critical(pending.block);
                }
            }
        }
        if first {
            self.cancel_non_critical();
        }
        self.update_finished_state(now);
        self.request_time_critical(now);
        Ok(())
    }

    /// Drops queued, unsent requests for pieces without a deadline so
    /// urgent requests are not stuck behind them.
    fn cancel_non_critical(&mut self) {
        let critical = self.time_critical.piece_set();
        for connection in self.connections.values_mut() {
            let peer = connection.peer();
            for pending in connection.request_queue() {
                if critical.contains(&pending.block.piece) {
                    continue;
                }
                connection.cancel_request(pending.block);
                if let Some(picker) = self.picker.as_mut() {
                    picker.abort_download(pending.block, peer);
                }
            }
        }
    }

    /// Removes a piece's deadline and restores its file priority.
    pub fn reset_piece_deadline(&mut self, piece: PieceIndex, now: Instant) {
        if self.time_critical.remove(piece, false, now).is_none() {
            return;
        }
        self.read_when_available.remove(&piece);
        self.restore_file_priority(piece);
    }

    /// Removes every deadline.
    pub fn clear_time_critical(&mut self) {
        for piece in self.time_critical.clear() {
            self.read_when_available.remove(&piece);
            self.restore_file_priority(piece);
        }
    }

    fn restore_file_priority(&mut self, piece: PieceIndex) {
        let (Some(layout), Some(picker)) = (&self.layout, self.picker.as_mut()) else {
            return;
        };
        if picker.have_piece(piece) {
            return;
        }
        let priority = file_derived_priority(layout, &self.file_priorities, piece);
        picker.set_piece_priority(piece, priority);
    }

    /// Hands out blocks of time-critical pieces to the fastest peers.
    pub(super) fn request_time_critical(&mut self, now: Instant) {
        if self.time_critical.is_empty() || self.upload_mode {
            return;
        }
        let Some(picker) = self.picker.as_mut() else {
            return;
        };
        let swarm = &self.config.swarm;
        let limits = RequestLimits {
            max_queue_time: swarm.max_time_critical_queue_time,
            horizon_margin: swarm.time_critical_horizon_margin,
        };
        let touched = self
            .time_critical
            .request_blocks(now, limits, &mut **picker, &mut self.connections);
        if !touched.is_empty() {
            tracing::trace!(
                info_hash = %self.info_hash,
                peers = touched.len(),
                pending = self.time_critical.len(),
                "Issued time-critical requests"
            );
        }
    }

    pub fn set_sequential_download(&mut self, sequential: bool) {
        if self.sequential_download != sequential {
            self.sequential_download = sequential;
            self.need_save_resume = true;
        }
    }

    pub fn sequential_download(&self) -> bool {
        self.sequential_download
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_derived_priority_takes_maximum() {
        let layout = TorrentLayout::new(
            "set".to_string(),
            16384,
            vec![[0; 20]; 2],
            vec![
                (vec!["a".to_string()], 10000, false),
                (vec!["b".to_string()], 10000, false),
            ],
        );
        // Piece 0 holds file a and the start of file b
        assert_eq!(file_derived_priority(&layout, &[1, 6], PieceIndex::new(0)), 6);
        assert_eq!(file_derived_priority(&layout, &[1, 0], PieceIndex::new(1)), 0);
        assert_eq!(file_derived_priority(&layout, &[], PieceIndex::new(1)), DEFAULT_PRIORITY);
    }
}
