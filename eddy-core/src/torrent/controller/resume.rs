use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::Torrent;
use crate::torrent::alerts::Alert;
use crate::torrent::disk::{DiskError, DiskErrorKind, DiskJob, FastresumeResult};
use crate::torrent::peer_list::PeerSource;
use crate::torrent::picker::{BlockRef, BlockState};
use crate::torrent::resume::{PIECE_HAVE, PIECE_VERIFIED, ResumeData, UnfinishedPiece};
use crate::torrent::tracker::{AnnounceEntry, TrackerSource};
use crate::torrent::{FileIndex, PieceIndex, TorrentError};

/// Peers whose only source is resume data saved per blob.
const MAX_RESUME_ONLY_PEERS: usize = 40;

fn limit_from_resume(value: i64) -> Option<u64> {
    u64::try_from(value).ok().filter(|&v| v > 0)
}

fn limit_to_resume(value: Option<u64>) -> i64 {
    value.and_then(|v| i64::try_from(v).ok()).unwrap_or(-1)
}

impl Torrent {
    /// Decodes and applies a resume blob.
    ///
    /// Returns false when the blob left the torrent in the error state.
    /// Any other rejection drops the blob and the disk check runs without it.
    pub(super) fn read_resume_blob(&mut self, blob: &[u8], now: Instant) -> bool {
        let parsed = ResumeData::decode(blob).and_then(|r| r.validate(self.info_hash).map(|()| r));
        let resume = match parsed {
            Ok(resume) => resume,
            Err(rejection) => {
                if let Some(code) = rejection.error_code() {
                    self.set_error(code, now);
                    return false;
                }
                tracing::warn!(info_hash = %self.info_hash, %rejection, "Resume data rejected");
                self.post(Alert::FastresumeRejected {
                    info_hash: self.info_hash,
                    reason: rejection.to_string(),
                });
                return true;
            }
        };

        self.counters.uploaded = resume.total_uploaded;
        self.counters.downloaded = resume.total_downloaded;
        self.counters.active_time = Duration::from_secs(resume.active_time);
        self.counters.finished_time = Duration::from_secs(resume.finished_time);
        self.counters.seeding_time = Duration::from_secs(resume.seeding_time);
        if resume.added_time > 0 {
            self.added_time = resume.added_time;
        }
        self.completed_time = resume.completed_time;
        self.num_complete = resume.num_complete;
        self.num_incomplete = resume.num_incomplete;
        self.num_downloaded = resume.num_downloaded;

        if !self.override_resume_data {
            self.apply_resume_settings(&resume);
        }
        self.apply_resume_trackers(&resume);
        for url in &resume.url_list {
            self.add_url_seed(url.clone());
        }
        for url in &resume.httpseeds {
            self.add_http_seed(url.clone());
        }
        self.apply_mapped_files(&resume);
        self.apply_resume_peers(&resume, now);

        tracing::debug!(info_hash = %self.info_hash, "Resume data loaded");
        self.pending_resume = Some(resume);
        self.need_save_resume = false;
        true
    }

    fn apply_resume_settings(&mut self, resume: &ResumeData) {
        self.allow_peers = !resume.paused;
        self.auto_managed = resume.auto_managed;
        self.announce_to_dht = resume.announce_to_dht;
        self.announce_to_lsd = resume.announce_to_lsd;
        self.announce_to_trackers = resume.announce_to_trackers;
        self.seed_mode = resume.seed_mode;
        self.sequential_download = resume.sequential_download;
        self.super_seeding = resume.super_seeding;
        self.share_mode = resume.share_mode;
        self.upload_mode = resume.upload_mode;
        self.upload_rate_limit = limit_from_resume(resume.upload_rate_limit);
        self.download_rate_limit = limit_from_resume(resume.download_rate_limit);
        if let Some(max) = limit_from_resume(resume.max_connections) {
            self.max_connections = max as usize;
        }
        self.max_uploads = limit_from_resume(resume.max_uploads).map(|v| v as usize);
        if !resume.file_priority.is_empty() {
            self.file_priorities = resume.file_priority.clone();
        }
    }

    fn apply_resume_trackers(&mut self, resume: &ResumeData) {
        if resume.trackers.is_empty() {
            return;
        }
        if !self.merge_resume_trackers {
            if self.override_resume_data && !self.trackers.is_empty() {
                return;
            }
            self.trackers.replace(Vec::new());
        }
        for (tier, urls) in resume.trackers.iter().enumerate() {
            let Ok(tier) = u8::try_from(tier) else {
                break;
            };
            for url in urls {
                match AnnounceEntry::validated(url, tier) {
                    Ok(mut entry) => {
                        entry.source = TrackerSource::RESUME_DATA;
                        self.trackers.add(entry);
                    }
                    Err(e) => {
                        tracing::debug!(info_hash = %self.info_hash, %url, error = %e, "Skipping resume tracker");
                    }
                }
            }
        }
    }

    fn apply_mapped_files(&mut self, resume: &ResumeData) {
        let Some(layout) = self.layout.as_mut() else {
            return;
        };
        if resume.mapped_files.len() != layout.num_files() {
            return;
        }
        for (index, path) in resume.mapped_files.iter().enumerate() {
            layout.rename_file(FileIndex(index as u32), path);
        }
    }

    fn apply_resume_peers(&mut self, resume: &ResumeData, now: Instant) {
        match resume.peer_addrs() {
            Ok(peers) => {
                for addr in peers {
                    self.add_peer(addr, PeerSource::RESUME_DATA, now);
                }
            }
            Err(e) => tracing::warn!(info_hash = %self.info_hash, error = %e, "Ignoring resume peers"),
        }
        match resume.banned_addrs() {
            Ok(banned) => {
                for addr in banned {
                    if let Some(handle) = self.add_peer(addr, PeerSource::RESUME_DATA, now) {
                        self.peers.ban_peer(handle);
                    }
                }
            }
            Err(e) => tracing::warn!(info_hash = %self.info_hash, error = %e, "Ignoring banned resume peers"),
        }
    }

    /// Applies saved piece priorities once the picker exists.
    pub(super) fn apply_resume_piece_priorities(&mut self) {
        let (Some(resume), Some(picker)) = (&self.pending_resume, self.picker.as_mut()) else {
            return;
        };
        if self.override_resume_data && !self.file_priorities.is_empty() {
            return;
        }
        let Ok(priorities) = resume.piece_priorities() else {
            return;
        };
        if priorities.len() != picker.num_pieces() as usize {
            return;
        }
        for (piece, &priority) in priorities.iter().enumerate() {
            picker.set_piece_priority(PieceIndex::new(piece as u32), priority);
        }
    }

    /// Pieces the resume data claims we have.
    pub(super) fn resume_have_pieces(&self) -> Vec<PieceIndex> {
        let (Some(resume), Some(layout)) = (&self.pending_resume, &self.layout) else {
            return Vec::new();
        };
        let Ok(flags) = resume.piece_flags() else {
            return Vec::new();
        };
        flags
            .iter()
            .take(layout.num_pieces() as usize)
            .enumerate()
            .filter(|(_, flag)| *flag & PIECE_HAVE != 0)
            .map(|(piece, _)| PieceIndex::new(piece as u32))
            .collect()
    }

    /// The disk checked the files against the resume data.
    pub(super) fn on_resume_checked(
        &mut self,
        result: FastresumeResult,
        error: Option<DiskError>,
        now: Instant,
    ) {
        if let Some(error) = error {
            if error.kind != DiskErrorKind::NotFound {
                self.pending_resume = None;
                self.handle_disk_error(error, None, now);
                return;
            }
            tracing::debug!(info_hash = %self.info_hash, %error, "Files missing, checking all pieces");
            self.pending_resume = None;
            self.start_full_check(now);
            return;
        }

        match result {
            FastresumeResult::Valid => {
                self.apply_resume_pieces();
                self.files_checked(now);
            }
            FastresumeResult::NeedFullCheck => {
                if self.pending_resume.is_some() {
                    self.post(Alert::FastresumeRejected {
                        info_hash: self.info_hash,
                        reason: "files do not match resume data".to_string(),
                    });
                }
                self.pending_resume = None;
                self.start_full_check(now);
            }
        }
    }

    fn apply_resume_pieces(&mut self) {
        let have = self.resume_have_pieces();
        let Some(resume) = self.pending_resume.take() else {
            return;
        };
        let Some(picker) = self.picker.as_mut() else {
            return;
        };
        for &piece in &have {
            picker.we_have(piece);
        }

        let mut complete = Vec::new();
        for unfinished in &resume.unfinished {
            let piece = PieceIndex::new(unfinished.piece);
            if unfinished.piece >= picker.num_pieces() || picker.have_piece(piece) {
                continue;
            }
            let num_blocks = picker.blocks_in_piece(piece);
            let Ok(blocks) = unfinished.finished_blocks(num_blocks) else {
                tracing::debug!(info_hash = %self.info_hash, %piece, "Ignoring corrupt block bitmap");
                continue;
            };
            for block in blocks {
                picker.mark_as_finished(BlockRef::new(piece, block), None);
            }
            if picker.is_piece_finished(piece) {
                complete.push(piece);
            }
        }
        tracing::debug!(
            info_hash = %self.info_hash,
            have = have.len(),
            unfinished = resume.unfinished.len(),
            "Resume data accepted"
        );
        // Every block was on disk but the hash never ran
        for piece in complete {
            if let Some(picker) = self.picker.as_mut() {
                picker.set_hashing(piece, true);
            }
            self.submit_plain(DiskJob::Hash { piece });
        }
    }

    /// Snapshot of everything needed to restart the torrent.
    pub fn write_resume_data(&self) -> ResumeData {
        let mut resume = ResumeData::new(self.info_hash);
        resume.total_uploaded = self.counters.uploaded;
        resume.total_downloaded = self.counters.downloaded;
        resume.active_time = self.counters.active_time.as_secs();
        resume.finished_time = self.counters.finished_time.as_secs();
        resume.seeding_time = self.counters.seeding_time.as_secs();
        resume.added_time = self.added_time;
        resume.completed_time = self.completed_time;
        if self.is_seed() {
            resume.last_seen_complete = chrono::Utc::now().timestamp();
        }
        resume.num_complete = self.num_complete;
        resume.num_incomplete = self.num_incomplete;
        resume.num_downloaded = self.num_downloaded;

        if let Some(layout) = &self.layout {
            let verified = if self.seed_mode { 0 } else { PIECE_VERIFIED };
            let flags: Vec<u8> = (0..layout.num_pieces())
                .map(|p| {
                    if self.have_piece(PieceIndex::new(p)) {
                        PIECE_HAVE | verified
                    } else {
                        0
                    }
                })
                .collect();
            resume.set_piece_flags(&flags);
            resume.blocks_per_piece = layout.blocks_per_piece();
            resume.mapped_files = layout
                .files()
                .iter()
                .map(|f| f.path.join("/"))
                .collect();
            if self.picker.is_some() {
                resume.set_piece_priorities(&self.piece_priorities());
            }
        }
        if let Some(picker) = &self.picker {
            resume.unfinished = picker
                .download_queue()
                .into_iter()
                .filter(|dp| dp.num_finished() > 0)
                .map(|dp| {
                    let finished: Vec<bool> = dp
                        .blocks
                        .iter()
                        .map(|b| b.state == BlockState::Finished)
                        .collect();
                    UnfinishedPiece::new(dp.index, &finished)
                })
                .collect();
        }
        resume.file_priority = self.file_priorities();

        resume.trackers = self.trackers.tiers();
        resume.url_list = self.url_seeds.clone();
        resume.httpseeds = self.http_seeds.clone();

        let (peers, banned) = self.resume_peers();
        resume.set_peers(&peers);
        resume.set_banned_peers(&banned);

        resume.upload_rate_limit = limit_to_resume(self.upload_rate_limit);
        resume.download_rate_limit = limit_to_resume(self.download_rate_limit);
        resume.max_connections = limit_to_resume(Some(self.max_connections as u64));
        resume.max_uploads = limit_to_resume(self.max_uploads.map(|v| v as u64));

        resume.paused = !self.allow_peers;
        resume.auto_managed = self.auto_managed;
        resume.announce_to_dht = self.announce_to_dht;
        resume.announce_to_lsd = self.announce_to_lsd;
        resume.announce_to_trackers = self.announce_to_trackers;
        resume.seed_mode = self.seed_mode;
        resume.sequential_download = self.sequential_download;
        resume.super_seeding = self.super_seeding;
        resume.share_mode = self.share_mode;
        resume.upload_mode = self.upload_mode;
        resume
    }

    /// Connectable peers worth retrying, and banned peers.
    fn resume_peers(&self) -> (Vec<SocketAddr>, Vec<SocketAddr>) {
        let max_failcount = self.config.swarm.max_failcount;
        let mut peers = Vec::new();
        let mut banned = Vec::new();
        let mut resume_only = 0;
        for (_, peer) in self.peers.iter() {
            let Some(addr) = peer.endpoint().socket_addr() else {
                continue;
            };
            if peer.is_banned() {
                banned.push(addr);
                continue;
            }
            if !peer.is_connectable() || peer.is_web_seed() || peer.failcount() >= max_failcount {
                continue;
            }
            if peer.source().is_only(PeerSource::RESUME_DATA) {
                if resume_only >= MAX_RESUME_ONLY_PEERS {
                    continue;
                }
                resume_only += 1;
            }
            peers.push(addr);
        }
        (peers, banned)
    }

    /// Asks the disk to flush; the blob is posted once it has.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidState` - If the torrent was removed
    pub fn save_resume_data(&mut self) -> Result<(), TorrentError> {
        if self.aborted {
            return Err(TorrentError::InvalidState { state: self.state });
        }
        self.need_save_resume = false;
        self.submit_plain(DiskJob::SaveResumeData);
        Ok(())
    }

    pub(super) fn on_resume_saved(&mut self, error: Option<DiskError>) {
        match error {
            None => {
                let resume = self.write_resume_data();
                self.post(Alert::SaveResumeData {
                    info_hash: self.info_hash,
                    resume: Box::new(resume),
                });
            }
            Some(error) => {
                tracing::warn!(info_hash = %self.info_hash, %error, "Saving resume data failed");
                self.need_save_resume = true;
                self.post(Alert::SaveResumeDataFailed {
                    info_hash: self.info_hash,
                    error,
                });
            }
        }
    }
}
