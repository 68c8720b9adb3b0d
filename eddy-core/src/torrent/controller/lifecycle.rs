use std::time::{Duration, Instant};

use super::Torrent;
use crate::config::QueueConfig;
use crate::torrent::alerts::Alert;
use crate::torrent::connection::DisconnectReason;
use crate::torrent::disk::DiskJob;
use crate::torrent::layout::TorrentLayout;
use crate::torrent::peer_list::{PeerListState, PeerSource};
use crate::torrent::tracker::AnnounceEvent;
use crate::torrent::{PieceIndex, TorrentError, TorrentErrorCode, TorrentState};

/// Seed rank flag: seed time or share ratio limits not met yet.
pub const SEED_RATIO_NOT_MET: u32 = 0x4000_0000;
/// Seed rank flag: the swarm has no seeds.
pub const NO_SEEDS: u32 = 0x2000_0000;
/// Seed rank flag: started less than 30 minutes ago.
pub const RECENTLY_STARTED: u32 = 0x1000_0000;
const SEED_RANK_MASK: u32 = 0x0fff_ffff;
const RECENT_START: Duration = Duration::from_secs(30 * 60);
/// Longest gap between ticks counted toward active time.
const MAX_TICK_GAP: Duration = Duration::from_secs(10);

impl Torrent {
    /// Starts the torrent: reads resume data, then checks files or waits
    /// for metadata.
    pub fn start(&mut self, now: Instant) {
        if self.aborted {
            return;
        }
        tracing::info!(info_hash = %self.info_hash, paused = self.is_paused(), "Starting torrent");
        self.started = now;

        if self.layout.is_none() {
            if let Some(info) = self.info_bytes.clone() {
                match TorrentLayout::from_info_bytes(self.info_hash, &info) {
                    Ok(layout) => self.layout = Some(layout),
                    Err(e) => {
                        self.set_error(
                            TorrentErrorCode::InvalidMetadata {
                                reason: e.to_string(),
                            },
                            now,
                        );
                        return;
                    }
                }
            }
        }

        if let Some(blob) = self.resume_blob.take() {
            if !self.read_resume_blob(&blob, now) {
                return;
            }
        }

        let peers = std::mem::take(&mut self.initial_peers);
        for addr in peers {
            self.add_peer(addr, PeerSource::RESUME_DATA, now);
        }

        if self.layout.is_none() {
            self.set_state(TorrentState::DownloadingMetadata, now);
            if !self.is_paused() {
                self.start_announcing(now);
            }
            return;
        }
        self.init(now);
    }

    /// Builds the picker and starts the resume-data check.
    pub(super) fn init(&mut self, now: Instant) {
        let Some(layout) = self.layout.clone() else {
            return;
        };
        if layout.num_pieces() == 0 {
            tracing::error!(info_hash = %self.info_hash, "Torrent has no pieces");
            self.set_error(TorrentErrorCode::InvalidPieceCount, now);
            return;
        }

        self.file_priorities.truncate(layout.num_files());
        self.picker = Some(self.new_picker(&layout));
        self.files_checked = false;
        self.update_piece_priorities(now);
        self.apply_resume_piece_priorities();
        if self.share_mode {
            self.filter_for_share_mode();
        }

        if self.seed_mode {
            if let Some(picker) = self.picker.as_mut() {
                for piece in (0..layout.num_pieces()).map(PieceIndex::new) {
                    picker.we_have(piece);
                }
            }
            self.pending_resume = None;
            self.files_checked(now);
            return;
        }

        self.set_state(TorrentState::CheckingResumeData, now);
        let have = self.resume_have_pieces();
        self.submit_plain(DiskJob::CheckFastresume { have });
    }

    pub(super) fn set_state(&mut self, state: TorrentState, now: Instant) {
        if self.state == state {
            return;
        }
        let previous = self.state;
        self.state = state;
        tracing::info!(info_hash = %self.info_hash, %previous, %state, "Torrent state changed");
        self.post(Alert::StateChanged {
            info_hash: self.info_hash,
            previous,
            state,
        });
        let ctx = self.policy_context(now);
        self.peers.sync_context(&ctx);
    }

    /// Stores a user-visible error and moves to the error state.
    pub(super) fn set_error(&mut self, error: TorrentErrorCode, now: Instant) {
        tracing::error!(info_hash = %self.info_hash, %error, "Torrent error");
        self.post(Alert::TorrentError {
            info_hash: self.info_hash,
            error: error.clone(),
        });
        self.error = Some(error);
        self.set_state(TorrentState::Error, now);
    }

    /// Clears the error and picks up where the torrent left off.
    pub fn clear_error(&mut self, now: Instant) {
        if self.error.take().is_none() {
            return;
        }
        tracing::info!(info_hash = %self.info_hash, "Error cleared");
        if self.layout.is_none() {
            self.set_state(TorrentState::DownloadingMetadata, now);
        } else if !self.files_checked {
            self.init(now);
        } else {
            self.settle_state(now);
        }
        if !self.is_paused() && !self.announcing && self.error.is_none() {
            self.start_announcing(now);
        }
    }

    /// Moves to downloading, finished or seeding to match the pieces we have.
    fn settle_state(&mut self, now: Instant) {
        let state = if self.is_seed() {
            TorrentState::Seeding
        } else if self.is_finished() {
            TorrentState::Finished
        } else {
            TorrentState::Downloading
        };
        self.set_state(state, now);
    }

    /// Called once every piece has been accounted for after a check.
    pub(super) fn files_checked(&mut self, now: Instant) {
        if self.aborted {
            return;
        }
        self.files_checked = true;
        self.checking_remaining = 0;
        self.pending_resume = None;
        self.post(Alert::TorrentChecked {
            info_hash: self.info_hash,
        });

        if self.is_finished() {
            self.finished(now);
        } else {
            self.set_state(TorrentState::Downloading, now);
        }

        for connection in self.connections.values_mut() {
            connection.update_interest();
        }
        if self.share_mode {
            self.recalc_share_mode(now);
        }
        if !self.is_paused() && !self.announcing {
            self.start_announcing(now);
        }
    }

    /// Every wanted piece is done.
    pub(super) fn finished(&mut self, now: Instant) {
        self.set_state(TorrentState::Finished, now);
        self.queue_position = None;
        if self.completed_time == 0 {
            self.completed_time = chrono::Utc::now().timestamp();
        }
        self.post(Alert::TorrentFinished {
            info_hash: self.info_hash,
        });

        if self.is_seed() {
            self.completed(now);
        }
        self.send_upload_only();

        if self.config.swarm.close_redundant_connections {
            let seeds: Vec<_> = self
                .connections
                .iter()
                .filter(|(_, c)| c.is_seed())
                .map(|(&id, _)| id)
                .collect();
            for id in seeds {
                self.close_connection(id, DisconnectReason::UploadToUpload, now);
            }
        }
        self.submit_plain(DiskJob::ReleaseFiles);
    }

    /// Every piece is done; the picker is no longer needed.
    pub(super) fn completed(&mut self, now: Instant) {
        self.picker = None;
        self.time_critical.clear();
        self.set_state(TorrentState::Seeding, now);
        tracing::info!(info_hash = %self.info_hash, "Download complete, seeding");
        if !self.announcing {
            return;
        }
        let pending: Vec<String> = self
            .trackers
            .entries()
            .iter()
            .filter(|e| !e.complete_sent)
            .map(|e| e.url.clone())
            .collect();
        for url in pending {
            self.trackers
                .force_reannounce(now, Duration::ZERO, Some(url.as_str()));
        }
        self.announce_with_tracker(now, AnnounceEvent::None);
    }

    /// Wanted pieces were added after we finished.
    pub(super) fn resume_download(&mut self, now: Instant) {
        if matches!(
            self.state,
            TorrentState::CheckingResumeData | TorrentState::CheckingFiles | TorrentState::Error
        ) {
            return;
        }
        tracing::debug!(info_hash = %self.info_hash, "Resuming download");
        self.set_state(TorrentState::Downloading, now);
        self.completed_time = 0;
        self.send_upload_only();
    }

    /// Discards piece state and hashes every piece again.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MetadataMissing` - If there is nothing to check yet
    /// - `TorrentError::InvalidState` - If the torrent was removed
    pub fn force_recheck(&mut self, now: Instant) -> Result<(), TorrentError> {
        if self.aborted {
            return Err(TorrentError::InvalidState { state: self.state });
        }
        let Some(layout) = self.layout.clone() else {
            return Err(TorrentError::MetadataMissing);
        };
        tracing::info!(info_hash = %self.info_hash, "Forced recheck");
        self.disconnect_all(DisconnectReason::Requested, now);
        self.stop_announcing(now);
        self.error = None;
        if layout.num_pieces() == 0 {
            self.set_error(TorrentErrorCode::InvalidPieceCount, now);
            return Ok(());
        }
        self.time_critical.clear();
        self.predictive.clear();
        self.files_checked = false;
        self.picker = Some(self.new_picker(&layout));
        self.update_piece_priorities(now);
        self.start_full_check(now);
        Ok(())
    }

    /// Hashes every piece; completions arrive through the checking path.
    pub(super) fn start_full_check(&mut self, now: Instant) {
        let Some(num_pieces) = self.layout.as_ref().map(|l| l.num_pieces()) else {
            return;
        };
        self.set_state(TorrentState::CheckingFiles, now);
        self.checking_remaining = num_pieces;
        for piece in (0..num_pieces).map(PieceIndex::new) {
            self.submit(
                DiskJob::Hash { piece },
                super::JobContext {
                    origin: None,
                    peer: None,
                    checking: true,
                },
            );
        }
    }

    /// Pauses the torrent. A graceful pause keeps connections with
    /// outstanding downloads open until they drain.
    pub fn pause(&mut self, graceful: bool, now: Instant) {
        if !self.allow_peers {
            return;
        }
        if !graceful {
            self.allow_peers = false;
        }
        self.announce_to_dht = false;
        self.announce_to_trackers = false;
        self.announce_to_lsd = false;
        self.need_save_resume = true;
        self.graceful_pause = graceful;
        self.do_pause(now);
    }

    fn do_pause(&mut self, now: Instant) {
        if !self.is_paused() {
            return;
        }
        tracing::info!(info_hash = %self.info_hash, graceful = self.graceful_pause, "Pausing torrent");
        self.post(Alert::TorrentPaused {
            info_hash: self.info_hash,
        });
        if self.layout.is_some() && self.files_checked {
            self.submit_plain(DiskJob::ReleaseFiles);
        }

        if self.graceful_pause {
            self.drain_graceful(now);
        } else {
            self.disconnect_all(DisconnectReason::TorrentPaused, now);
        }
        self.stop_announcing(now);
    }

    /// Closes idle connections of a gracefully paused torrent and stops the
    /// others from queueing new requests.
    fn drain_graceful(&mut self, now: Instant) {
        let mut idle = Vec::new();
        for (&id, connection) in self.connections.iter_mut() {
            if connection.download_queue().is_empty() {
                idle.push(id);
                continue;
            }
            for pending in connection.request_queue() {
                connection.cancel_request(pending.block);
                if let Some(picker) = self.picker.as_mut() {
                    picker.abort_download(pending.block, connection.peer());
                }
            }
        }
        for id in idle {
            self.close_connection(id, DisconnectReason::TorrentPaused, now);
        }
        if self.connections.is_empty() && self.graceful_pause {
            self.graceful_pause = false;
            self.allow_peers = false;
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if self.allow_peers
            && !self.graceful_pause
            && self.announce_to_dht
            && self.announce_to_trackers
            && self.announce_to_lsd
        {
            return;
        }
        self.announce_to_dht = true;
        self.announce_to_trackers = true;
        self.announce_to_lsd = true;
        self.allow_peers = true;
        self.graceful_pause = false;
        self.need_save_resume = true;

        tracing::info!(info_hash = %self.info_hash, "Resuming torrent");
        self.post(Alert::TorrentResumed {
            info_hash: self.info_hash,
        });
        self.started = now;
        if let Err(e) = self.load_metadata() {
            self.set_error(
                TorrentErrorCode::InvalidMetadata {
                    reason: e.to_string(),
                },
                now,
            );
            return;
        }
        self.clear_error(now);
        if !self.announcing && self.error.is_none() && self.state != TorrentState::CheckingResumeData {
            self.start_announcing(now);
        }
    }

    /// Tears the torrent down. Outstanding disk jobs complete as no-ops.
    pub fn abort(&mut self, now: Instant) {
        if self.aborted {
            return;
        }
        tracing::info!(info_hash = %self.info_hash, "Aborting torrent");
        self.disconnect_all(DisconnectReason::TorrentRemoved, now);
        self.stop_announcing(now);
        self.aborted = true;
        self.tracker_timer = None;
        self.time_critical.clear();
        self.piece_reads.clear();
        self.collab.disk.abort(self.info_hash);
        let mut state = PeerListState::default();
        self.peers.clear(&mut state);
        self.apply_peer_state(state, now);
    }

    /// Once-per-second housekeeping.
    pub fn tick(&mut self, now: Instant) {
        let elapsed = self
            .last_tick
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t))
            .min(MAX_TICK_GAP);
        self.last_tick = Some(now);
        if self.aborted {
            return;
        }

        if !self.is_paused() {
            self.counters.active_time += elapsed;
            if self.is_finished() {
                self.counters.finished_time += elapsed;
            }
            if self.is_seed() {
                self.counters.seeding_time += elapsed;
            }
        }

        if self.graceful_pause {
            self.drain_graceful(now);
        }
        if self.is_paused() || self.error.is_some() {
            return;
        }

        if self.tracker_timer.is_some_and(|t| t <= now) {
            self.announce_with_tracker(now, AnnounceEvent::None);
        }
        self.maybe_announce_dht(now);
        self.maybe_announce_lsd(now);
        self.request_time_critical(now);
        self.connect_peers(now);
        if self.share_mode {
            self.recalc_share_mode(now);
        }
    }

    pub fn set_auto_managed(&mut self, auto_managed: bool) {
        if self.auto_managed == auto_managed {
            return;
        }
        self.auto_managed = auto_managed;
        self.need_save_resume = true;
    }

    pub fn set_queue_position(&mut self, position: Option<usize>) {
        self.queue_position = position;
    }

    /// Seeding priority for the queue; higher ranks seed first.
    pub fn seed_rank(&self, queue: &QueueConfig, now: Instant) -> u32 {
        if !self.is_finished() {
            return 0;
        }
        let scale: u64 = if self.is_seed() { 1000 } else { 500 };
        let mut rank = 0;

        let total_size = self.layout.as_ref().map_or(0, |l| l.total_size());
        let downloaded = self.counters.downloaded.max(total_size);
        if self.counters.finished_time < queue.seed_time_limit
            && downloaded > 0
            && (self.counters.uploaded as f64 / downloaded as f64) < f64::from(queue.share_ratio_limit)
        {
            rank |= SEED_RATIO_NOT_MET;
        }
        if !self.is_paused() && now.saturating_duration_since(self.started) < RECENT_START {
            rank |= RECENTLY_STARTED;
        }

        let seeds = if self.num_complete >= 0 {
            self.num_complete as u64
        } else {
            self.peers.num_seeds() as u64
        };
        let downloaders = if self.num_incomplete >= 0 {
            self.num_incomplete as u64
        } else {
            (self.peers.len() - self.peers.num_seeds()) as u64
        };
        if seeds == 0 {
            rank |= NO_SEEDS;
            rank |= (downloaders as u32) & SEED_RANK_MASK;
        } else {
            rank |= (((1 + downloaders) * scale / seeds) as u32) & SEED_RANK_MASK;
        }
        rank
    }
}
