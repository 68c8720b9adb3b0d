//! The per-torrent state machine.
//!
//! A [`Torrent`] is driven entirely by its owner: API calls, peer events,
//! disk completions, tracker replies and a once-per-second [`Torrent::tick`].
//! Every entry point takes the current time, so the whole machine can run
//! on a virtual clock in tests.
//!
//! The implementation is split by concern:
//! - `lifecycle`: state transitions, pause/resume, abort, queueing hooks
//! - `verification`: block writes, hash results, disk errors, upload mode
//! - `peers`: connecting, attaching and closing peer connections
//! - `priority`: file/piece priorities and time-critical pieces
//! - `announce`: tracker, DHT and local discovery scheduling
//! - `resume`: reading and writing resume data
//! - `share_mode`: share mode economics
//! - `metadata`: metadata loading and file operations

mod announce;
mod lifecycle;
mod metadata;
mod peers;
mod priority;
mod resume;
mod share_mode;
mod verification;

pub use lifecycle::{NO_SEEDS, RECENTLY_STARTED, SEED_RATIO_NOT_MET};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::alerts::{Alert, AlertSink};
use super::connection::{ConnectionFactory, ConnectionId, PeerConnection};
use super::disk::{DiskCompletion, DiskIo, DiskJob, DiskOutcome, JobId, JobStatus};
use super::layout::TorrentLayout;
use super::peer_list::{PeerHandle, PeerList, PeerListState, PolicyContext};
use super::picker::{BlockPicker, PiecePicker};
use super::resume::ResumeData;
use super::time_critical::TimeCriticalQueue;
use super::tracker::{DhtService, LsdService, TrackerList, TrackerTransport};
use super::{FileIndex, InfoHash, PieceIndex, TorrentErrorCode, TorrentState};
use crate::config::EddyConfig;

/// Builds the availability structure for a torrent once its layout is known.
pub type PickerFactory = Arc<dyn Fn(&TorrentLayout) -> Box<dyn PiecePicker> + Send + Sync>;

/// External services a torrent talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub disk: Arc<dyn DiskIo>,
    pub tracker: Arc<dyn TrackerTransport>,
    pub dht: Option<Arc<dyn DhtService>>,
    pub lsd: Option<Arc<dyn LsdService>>,
    pub connector: Arc<dyn ConnectionFactory>,
    pub alerts: AlertSink,
    /// Defaults to [`BlockPicker`]
    pub picker: Option<PickerFactory>,
}

/// Everything needed to add a torrent.
#[derive(Debug, Clone)]
pub struct AddTorrentParams {
    pub info_hash: InfoHash,
    pub name: Option<String>,
    /// Bencoded info dictionary, if known
    pub info: Option<Bytes>,
    /// Prebuilt layout; takes precedence over `info`
    pub layout: Option<TorrentLayout>,
    pub save_path: PathBuf,
    /// Tracker URLs grouped by tier
    pub trackers: Vec<Vec<String>>,
    pub url_seeds: Vec<String>,
    pub http_seeds: Vec<String>,
    pub peers: Vec<SocketAddr>,
    pub resume_data: Option<Vec<u8>>,
    pub file_priorities: Vec<u8>,
    pub paused: bool,
    pub auto_managed: bool,
    pub share_mode: bool,
    pub upload_mode: bool,
    pub seed_mode: bool,
    pub sequential_download: bool,
    /// Settings given here win over the ones in resume data
    pub override_resume_data: bool,
    /// Merge resume trackers into `trackers` instead of replacing them
    pub merge_resume_trackers: bool,
    pub max_connections: Option<usize>,
    pub max_uploads: Option<usize>,
    pub upload_rate_limit: Option<u64>,
    pub download_rate_limit: Option<u64>,
    pub listen_port: u16,
}

impl AddTorrentParams {
    pub fn new(info_hash: InfoHash) -> Self {
        Self {
            info_hash,
            name: None,
            info: None,
            layout: None,
            save_path: PathBuf::from("."),
            trackers: Vec::new(),
            url_seeds: Vec::new(),
            http_seeds: Vec::new(),
            peers: Vec::new(),
            resume_data: None,
            file_priorities: Vec::new(),
            paused: false,
            auto_managed: false,
            share_mode: false,
            upload_mode: false,
            seed_mode: false,
            sequential_download: false,
            override_resume_data: false,
            merge_resume_trackers: false,
            max_connections: None,
            max_uploads: None,
            upload_rate_limit: None,
            download_rate_limit: None,
            listen_port: 6881,
        }
    }

    pub fn with_layout(mut self, layout: TorrentLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_trackers(mut self, tiers: Vec<Vec<String>>) -> Self {
        self.trackers = tiers;
        self
    }

    pub fn with_resume_data(mut self, blob: Vec<u8>) -> Self {
        self.resume_data = Some(blob);
        self
    }
}

/// Snapshot of a torrent for status queries.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentStatus {
    pub info_hash: InfoHash,
    pub name: Option<String>,
    pub state: TorrentState,
    pub paused: bool,
    pub auto_managed: bool,
    pub upload_mode: bool,
    pub share_mode: bool,
    pub error: Option<TorrentErrorCode>,
    /// Wanted bytes done over wanted bytes, 1.0 when nothing is wanted
    pub progress: f32,
    pub total_done: u64,
    pub total_wanted: u64,
    pub total_wanted_done: u64,
    pub num_pieces: u32,
    pub num_have: u32,
    pub total_uploaded: u64,
    pub total_downloaded: u64,
    pub total_failed_bytes: u64,
    pub total_redundant_bytes: u64,
    pub num_connections: usize,
    pub num_connected_seeds: usize,
    pub list_peers: usize,
    pub list_seeds: usize,
    pub connect_candidates: usize,
    /// Swarm counts reported by trackers, -1 if unknown
    pub num_complete: i32,
    pub num_incomplete: i32,
    pub next_announce: Option<Duration>,
    pub current_tracker: Option<String>,
    pub queue_position: Option<usize>,
    pub active_time: Duration,
    pub finished_time: Duration,
    pub seeding_time: Duration,
    pub need_save_resume: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    uploaded: u64,
    downloaded: u64,
    failed_bytes: u64,
    redundant_bytes: u64,
    active_time: Duration,
    finished_time: Duration,
    seeding_time: Duration,
}

/// Why a disk job was submitted, kept until its completion arrives.
#[derive(Debug, Clone, Copy)]
struct JobContext {
    /// Connection that delivered the data of a write
    origin: Option<ConnectionId>,
    peer: Option<PeerHandle>,
    /// Hash issued by a file check rather than a download
    checking: bool,
}

/// Blocks of a piece being read back for a consumer.
#[derive(Debug)]
struct PieceRead {
    blocks: Vec<Option<Bytes>>,
    remaining: u32,
}

/// Swarm state of one torrent.
pub struct Torrent {
    info_hash: InfoHash,
    name: Option<String>,
    config: Arc<EddyConfig>,
    collab: Collaborators,

    state: TorrentState,
    error: Option<TorrentErrorCode>,
    layout: Option<TorrentLayout>,
    info_bytes: Option<Bytes>,
    /// File paths kept while the layout is unloaded
    unloaded_files: Option<Vec<String>>,
    save_path: PathBuf,
    picker: Option<Box<dyn PiecePicker>>,
    file_priorities: Vec<u8>,
    files_checked: bool,
    checking_remaining: u32,
    resume_blob: Option<Vec<u8>>,
    pending_resume: Option<ResumeData>,
    initial_peers: Vec<SocketAddr>,
    override_resume_data: bool,
    merge_resume_trackers: bool,

    peers: PeerList,
    connections: BTreeMap<ConnectionId, Box<dyn PeerConnection>>,
    external_address: Option<SocketAddr>,

    trackers: TrackerList,
    url_seeds: Vec<String>,
    http_seeds: Vec<String>,
    tracker_timer: Option<Instant>,
    next_dht_announce: Option<Instant>,
    next_lsd_announce: Option<Instant>,
    tracker_key: u32,
    listen_port: u16,
    num_complete: i32,
    num_incomplete: i32,
    num_downloaded: i32,

    time_critical: TimeCriticalQueue,
    read_when_available: BTreeSet<PieceIndex>,
    piece_reads: HashMap<PieceIndex, PieceRead>,
    predictive: Vec<PieceIndex>,

    counters: Counters,
    allow_peers: bool,
    graceful_pause: bool,
    auto_managed: bool,
    announce_to_trackers: bool,
    announce_to_dht: bool,
    announce_to_lsd: bool,
    announcing: bool,
    upload_mode: bool,
    share_mode: bool,
    seed_mode: bool,
    sequential_download: bool,
    super_seeding: bool,
    need_save_resume: bool,
    aborted: bool,
    queue_position: Option<usize>,
    max_connections: usize,
    max_uploads: Option<usize>,
    upload_rate_limit: Option<u64>,
    download_rate_limit: Option<u64>,

    epoch: Instant,
    started: Instant,
    last_tick: Option<Instant>,
    added_time: i64,
    completed_time: i64,

    next_job: u64,
    jobs: HashMap<JobId, JobContext>,
    rng: ChaCha8Rng,
}

impl std::fmt::Debug for Torrent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Torrent")
            .field("info_hash", &self.info_hash)
            .field("state", &self.state)
            .field("connections", &self.connections.len())
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl Torrent {
    /// Creates a torrent in the checking-resume-data state.
    ///
    /// Nothing happens until [`Torrent::start`] is called.
    pub fn new(
        params: AddTorrentParams,
        config: Arc<EddyConfig>,
        collab: Collaborators,
        now: Instant,
    ) -> Self {
        let mut trackers = TrackerList::new(&config.tracker);
        for (tier, urls) in params.trackers.iter().enumerate() {
            for url in urls {
                trackers.add(super::tracker::AnnounceEntry::new(url.clone(), tier as u8));
            }
        }
        let max_connections = params
            .max_connections
            .unwrap_or(config.swarm.max_connections);
        let peers = PeerList::new(config.swarm.deterministic_seed);
        let mut rng = torrent_rng(params.info_hash, config.swarm.deterministic_seed);
        let tracker_key = rng.random();

        Self {
            info_hash: params.info_hash,
            name: params.name,
            collab,
            state: TorrentState::CheckingResumeData,
            error: None,
            layout: params.layout,
            info_bytes: params.info,
            unloaded_files: None,
            save_path: params.save_path,
            picker: None,
            file_priorities: params.file_priorities,
            files_checked: false,
            checking_remaining: 0,
            resume_blob: params.resume_data,
            pending_resume: None,
            initial_peers: params.peers,
            override_resume_data: params.override_resume_data,
            merge_resume_trackers: params.merge_resume_trackers,
            peers,
            connections: BTreeMap::new(),
            external_address: None,
            trackers,
            url_seeds: params.url_seeds,
            http_seeds: params.http_seeds,
            tracker_timer: None,
            next_dht_announce: None,
            next_lsd_announce: None,
            tracker_key,
            listen_port: params.listen_port,
            num_complete: -1,
            num_incomplete: -1,
            num_downloaded: -1,
            time_critical: TimeCriticalQueue::new(),
            read_when_available: BTreeSet::new(),
            piece_reads: HashMap::new(),
            predictive: Vec::new(),
            counters: Counters::default(),
            allow_peers: !params.paused,
            graceful_pause: false,
            auto_managed: params.auto_managed,
            announce_to_trackers: true,
            announce_to_dht: true,
            announce_to_lsd: true,
            announcing: false,
            upload_mode: params.upload_mode,
            share_mode: params.share_mode,
            seed_mode: params.seed_mode,
            sequential_download: params.sequential_download,
            super_seeding: false,
            need_save_resume: true,
            aborted: false,
            queue_position: None,
            max_connections,
            max_uploads: params.max_uploads,
            upload_rate_limit: params.upload_rate_limit,
            download_rate_limit: params.download_rate_limit,
            epoch: now,
            started: now,
            last_tick: None,
            added_time: chrono::Utc::now().timestamp(),
            completed_time: 0,
            next_job: 0,
            jobs: HashMap::new(),
            rng,
            config,
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| self.layout.as_ref().map(|l| l.name()))
    }

    pub fn state(&self) -> TorrentState {
        self.state
    }

    pub fn error(&self) -> Option<&TorrentErrorCode> {
        self.error.as_ref()
    }

    pub fn layout(&self) -> Option<&TorrentLayout> {
        self.layout.as_ref()
    }

    pub fn has_metadata(&self) -> bool {
        self.layout.is_some()
    }

    pub fn picker(&self) -> Option<&dyn PiecePicker> {
        self.picker.as_deref()
    }

    pub fn peer_list(&self) -> &PeerList {
        &self.peers
    }

    pub fn trackers(&self) -> &TrackerList {
        &self.trackers
    }

    pub fn time_critical(&self) -> &TimeCriticalQueue {
        &self.time_critical
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&dyn PeerConnection> {
        self.connections.get(&id).map(|c| c.as_ref())
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Disk jobs submitted and not completed yet.
    pub fn jobs_in_flight(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_paused(&self) -> bool {
        !self.allow_peers || self.graceful_pause
    }

    pub fn is_auto_managed(&self) -> bool {
        self.auto_managed
    }

    pub fn upload_mode(&self) -> bool {
        self.upload_mode
    }

    pub fn share_mode(&self) -> bool {
        self.share_mode
    }

    pub fn need_save_resume_data(&self) -> bool {
        self.need_save_resume
    }

    pub fn queue_position(&self) -> Option<usize> {
        self.queue_position
    }

    /// Every wanted piece is done. False without metadata.
    pub fn is_finished(&self) -> bool {
        match (&self.layout, &self.picker) {
            (None, _) => false,
            (Some(_), None) => self.files_checked,
            (Some(_), Some(picker)) => self.files_checked && picker.is_finished(),
        }
    }

    /// Every piece is done. False without metadata.
    pub fn is_seed(&self) -> bool {
        match (&self.layout, &self.picker) {
            (None, _) => false,
            (Some(_), None) => self.files_checked,
            (Some(_), Some(picker)) => self.files_checked && picker.is_seed(),
        }
    }

    pub fn have_piece(&self, piece: PieceIndex) -> bool {
        match &self.picker {
            Some(picker) => picker.have_piece(piece),
            None => self.is_seed() && self.valid_piece(piece),
        }
    }

    fn valid_piece(&self, piece: PieceIndex) -> bool {
        self.layout
            .as_ref()
            .is_some_and(|l| piece.as_u32() < l.num_pieces())
    }

    /// Piece payload bytes we have, padding excluded.
    pub fn total_done(&self) -> u64 {
        let Some(layout) = &self.layout else {
            return 0;
        };
        if self.picker.is_none() {
            return if self.is_seed() {
                layout.total_size() - layout.total_pad_bytes()
            } else {
                0
            };
        }
        (0..layout.num_pieces())
            .map(PieceIndex::new)
            .filter(|&p| self.have_piece(p))
            .map(|p| u64::from(layout.piece_size(p)) - layout.pad_bytes_in_piece(p))
            .sum()
    }

    /// Bytes done per file, padding files report zero.
    pub fn file_progress(&self) -> Vec<u64> {
        let Some(layout) = &self.layout else {
            return Vec::new();
        };
        let mut progress = vec![0u64; layout.num_files()];
        for piece in (0..layout.num_pieces()).map(PieceIndex::new) {
            if !self.have_piece(piece) {
                continue;
            }
            for file in layout.files_in_piece(piece) {
                if layout.file(file).is_some_and(|f| !f.pad) {
                    progress[file.0 as usize] += layout.file_bytes_in_piece(file, piece);
                }
            }
        }
        progress
    }

    pub fn status(&self, now: Instant) -> TorrentStatus {
        let (total_wanted, total_wanted_done) = self.wanted_bytes();
        let progress = if total_wanted == 0 {
            1.0
        } else {
            total_wanted_done as f32 / total_wanted as f32
        };
        TorrentStatus {
            info_hash: self.info_hash,
            name: self.name().map(str::to_string),
            state: self.state,
            paused: self.is_paused(),
            auto_managed: self.auto_managed,
            upload_mode: self.upload_mode,
            share_mode: self.share_mode,
            error: self.error.clone(),
            progress,
            total_done: self.total_done(),
            total_wanted,
            total_wanted_done,
            num_pieces: self.layout.as_ref().map_or(0, |l| l.num_pieces()),
            num_have: self.num_have(),
            total_uploaded: self.counters.uploaded,
            total_downloaded: self.counters.downloaded,
            total_failed_bytes: self.counters.failed_bytes,
            total_redundant_bytes: self.counters.redundant_bytes,
            num_connections: self.connections.len(),
            num_connected_seeds: self.connections.values().filter(|c| c.is_seed()).count(),
            list_peers: self.peers.len(),
            list_seeds: self.peers.num_seeds(),
            connect_candidates: self.peers.num_connect_candidates(),
            num_complete: self.num_complete,
            num_incomplete: self.num_incomplete,
            next_announce: self
                .tracker_timer
                .map(|t| t.saturating_duration_since(now)),
            current_tracker: self.trackers.last_working().map(|e| e.url.clone()),
            queue_position: self.queue_position,
            active_time: self.counters.active_time,
            finished_time: self.counters.finished_time,
            seeding_time: self.counters.seeding_time,
            need_save_resume: self.need_save_resume,
        }
    }

    fn num_have(&self) -> u32 {
        match &self.picker {
            Some(picker) => picker.num_have(),
            None if self.is_seed() => self.layout.as_ref().map_or(0, |l| l.num_pieces()),
            None => 0,
        }
    }

    fn wanted_bytes(&self) -> (u64, u64) {
        let Some(layout) = &self.layout else {
            return (0, 0);
        };
        let mut wanted = 0;
        let mut done = 0;
        for piece in (0..layout.num_pieces()).map(PieceIndex::new) {
            let filtered = self
                .picker
                .as_ref()
                .is_some_and(|p| p.piece_priority(piece) == 0);
            if filtered {
                continue;
            }
            let bytes = u64::from(layout.piece_size(piece)) - layout.pad_bytes_in_piece(piece);
            wanted += bytes;
            if self.have_piece(piece) {
                done += bytes;
            }
        }
        (wanted, done)
    }

    fn post(&self, alert: Alert) {
        self.collab.alerts.post(alert);
    }

    /// Seconds since the torrent was created, starting at 1 so that zero
    /// keeps meaning "never".
    fn session_time(&self, now: Instant) -> u32 {
        now.saturating_duration_since(self.epoch).as_secs() as u32 + 1
    }

    fn policy_context(&self, now: Instant) -> PolicyContext {
        let swarm = &self.config.swarm;
        PolicyContext {
            is_finished: self.is_finished(),
            max_failcount: swarm.max_failcount,
            max_peerlist_size: if self.is_paused() {
                swarm.max_paused_peerlist_size
            } else {
                swarm.max_peerlist_size
            },
            allow_multiple_connections_per_ip: swarm.allow_multiple_connections_per_ip,
            no_connect_privileged_ports: swarm.no_connect_privileged_ports,
            min_reconnect_time: swarm.min_reconnect_time.as_secs() as u32,
            session_time: self.session_time(now),
            external: self.external_address,
        }
    }

    fn new_picker(&self, layout: &TorrentLayout) -> Box<dyn PiecePicker> {
        match &self.collab.picker {
            Some(factory) => factory(layout),
            None => Box::new(BlockPicker::new(
                layout.num_pieces(),
                layout.blocks_per_piece(),
                layout.blocks_in_last_piece(),
            )),
        }
    }

    fn submit(&mut self, job: DiskJob, context: JobContext) -> JobId {
        let id = JobId(self.next_job);
        self.next_job += 1;
        self.jobs.insert(id, context);
        self.collab.disk.submit(self.info_hash, id, job);
        id
    }

    fn submit_plain(&mut self, job: DiskJob) -> JobId {
        self.submit(
            job,
            JobContext {
                origin: None,
                peer: None,
                checking: false,
            },
        )
    }

    /// Routes a disk completion to its handler.
    ///
    /// Completions of an aborted torrent, and of jobs this torrent does not
    /// know, only settle the in-flight count.
    pub fn on_disk_completion(&mut self, completion: DiskCompletion, now: Instant) {
        let Some(context) = self.jobs.remove(&completion.job) else {
            tracing::trace!(info_hash = %self.info_hash, job = completion.job.0, "Unknown disk job");
            return;
        };
        if self.aborted && completion.outcome != DiskOutcome::Deleted {
            return;
        }
        if completion.status == JobStatus::Aborted {
            if let (DiskOutcome::Written { block }, Some(picker)) =
                (&completion.outcome, self.picker.as_mut())
            {
                picker.write_failed(*block);
            }
            return;
        }

        let error = completion.error;
        match completion.outcome {
            DiskOutcome::Written { block } => self.on_disk_write_complete(block, context, error, now),
            DiskOutcome::Hashed { piece, digest } => {
                if context.checking {
                    self.on_piece_checked(piece, digest, error, now);
                } else {
                    self.on_piece_hashed(piece, digest, error, now);
                }
            }
            DiskOutcome::Read { block, data } => self.on_disk_read_complete(block, data, error, now),
            DiskOutcome::Fastresume(result) => self.on_resume_checked(result, error, now),
            DiskOutcome::Released => {
                tracing::trace!(info_hash = %self.info_hash, "Files released");
            }
            DiskOutcome::Renamed { file, name } => self.on_file_renamed(file, name, error),
            DiskOutcome::Moved { path } => self.on_storage_moved(path, error),
            DiskOutcome::Deleted => self.on_files_deleted(error),
            DiskOutcome::ResumeSaved => self.on_resume_saved(error),
        }
    }

    /// Closes the connections the peer list asked to close, then purges
    /// erased peers from dependent structures, until nothing is left.
    ///
    /// Closing comes first: a connection still knows its peer handle and
    /// hands back the availability it contributed.
    fn apply_peer_state(&mut self, mut state: PeerListState, now: Instant) {
        loop {
            let disconnect = std::mem::take(&mut state.disconnect);
            let erased = std::mem::take(&mut state.erased);
            if disconnect.is_empty() && erased.is_empty() {
                break;
            }
            for (id, reason) in disconnect {
                if let Some(mut connection) = self.connections.remove(&id) {
                    tracing::debug!(
                        info_hash = %self.info_hash,
                        remote = %connection.remote(),
                        %reason,
                        "Closing connection"
                    );
                    connection.disconnect(reason);
                    self.detach_connection(connection, now, &mut state);
                }
            }
            for handle in erased {
                if let Some(picker) = self.picker.as_mut() {
                    picker.clear_peer(handle);
                }
                for connection in self.connections.values_mut() {
                    if connection.peer() == Some(handle) {
                        connection.set_peer(None);
                    }
                }
            }
        }
        if let Some(has) = self.peers.take_candidates_transition() {
            tracing::trace!(info_hash = %self.info_hash, has_candidates = has, "Connect candidates changed");
        }
    }

    fn file_count(&self) -> usize {
        self.layout.as_ref().map_or(0, |l| l.num_files())
    }

    fn check_file_index(&self, file: FileIndex) -> Result<(), super::TorrentError> {
        let num_files = self.file_count();
        if self.layout.is_none() {
            return Err(super::TorrentError::MetadataMissing);
        }
        if file.0 as usize >= num_files {
            return Err(super::TorrentError::InvalidFileIndex {
                index: file,
                num_files,
            });
        }
        Ok(())
    }

    fn check_piece_index(&self, piece: PieceIndex) -> Result<(), super::TorrentError> {
        let Some(layout) = &self.layout else {
            return Err(super::TorrentError::MetadataMissing);
        };
        if piece.as_u32() >= layout.num_pieces() {
            return Err(super::TorrentError::InvalidPieceIndex {
                index: piece,
                num_pieces: layout.num_pieces(),
            });
        }
        Ok(())
    }
}

/// Per-torrent random source. Seeded runs are reproducible per info-hash.
fn torrent_rng(info_hash: InfoHash, seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => {
            let bytes = info_hash.as_bytes();
            let mixed = seed ^ u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            ChaCha8Rng::seed_from_u64(mixed)
        }
        None => ChaCha8Rng::from_os_rng(),
    }
}
