//! Mock collaborators for driving torrents in tests.
//!
//! Every mock keeps its state behind a shared handle so a test can keep
//! inspecting a connection or the disk after ownership moved into a
//! [`Torrent`](crate::torrent::Torrent).

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use super::events::EventSender;
use crate::torrent::alerts::AlertSink;
use crate::torrent::connection::{
    ConnectionFactory, ConnectionId, ConnectionKind, ConnectionStats, DisconnectReason,
    PeerConnection, PendingBlock, RequestFlags,
};
use crate::torrent::controller::Collaborators;
use crate::torrent::disk::{
    DiskCompletion, DiskError, DiskErrorKind, DiskIo, DiskJob, DiskOperation, DiskOutcome,
    FastresumeResult, JobId,
};
use crate::torrent::layout::{TorrentLayout, sha1_digest};
use crate::torrent::peer_list::{PeerEndpoint, PeerHandle};
use crate::torrent::picker::{BLOCK_SIZE, BlockRef};
use crate::torrent::tracker::{DhtService, LsdService, TrackerRequest, TrackerTransport};
use crate::torrent::{InfoHash, PieceIndex, TorrentError};

/// Observable state of a [`MockConnection`].
#[derive(Debug, Clone, Default)]
pub struct MockConnectionState {
    pub peer: Option<PeerHandle>,
    pub pieces: BTreeSet<PieceIndex>,
    pub seed: bool,
    pub connecting: bool,
    pub interested: bool,
    pub share_mode: bool,
    pub failed: bool,
    pub fast_reconnect: bool,
    pub queue_time: Duration,
    pub time_critical_allowed: bool,
    pub refuse_requests: bool,
    /// Returned from `received_invalid_data`
    pub keep_on_invalid_data: bool,
    pub download_queue: Vec<PendingBlock>,
    pub request_queue: Vec<PendingBlock>,
    pub cancelled: Vec<BlockRef>,
    pub sent_requests: usize,
    pub announced: Vec<PieceIndex>,
    pub dont_have: Vec<PieceIndex>,
    pub upload_only: Option<bool>,
    pub share_mode_sent: Option<bool>,
    pub interest_updates: usize,
    pub valid_data: Vec<PieceIndex>,
    pub invalid_data: Vec<PieceIndex>,
    pub disconnected: Option<DisconnectReason>,
    pub stats: ConnectionStats,
}

/// Shared view of a [`MockConnection`], usable after the connection was
/// handed over.
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    id: ConnectionId,
    remote: SocketAddr,
    state: Arc<Mutex<MockConnectionState>>,
}

impl ConnectionMonitor {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Snapshot of the connection state.
    pub fn state(&self) -> MockConnectionState {
        self.state.lock().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut MockConnectionState)) {
        f(&mut self.state.lock());
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.state.lock().disconnected
    }

    /// Marks a connecting connection as established.
    pub fn set_connected(&self) {
        self.state.lock().connecting = false;
    }
}

/// Scriptable peer connection.
#[derive(Debug)]
pub struct MockConnection {
    id: ConnectionId,
    kind: ConnectionKind,
    remote: SocketAddr,
    local: SocketAddr,
    outgoing: bool,
    state: Arc<Mutex<MockConnectionState>>,
}

impl MockConnection {
    /// An established incoming connection.
    pub fn new(id: ConnectionId, remote: SocketAddr) -> Self {
        let state = MockConnectionState {
            time_critical_allowed: true,
            keep_on_invalid_data: true,
            ..Default::default()
        };
        Self {
            id,
            kind: ConnectionKind::BitTorrent,
            remote,
            local: SocketAddr::from(([127, 0, 0, 1], 6881)),
            outgoing: false,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn outgoing(mut self) -> Self {
        self.outgoing = true;
        self
    }

    pub fn with_pieces(self, pieces: impl IntoIterator<Item = PieceIndex>) -> Self {
        self.state.lock().pieces.extend(pieces);
        self
    }

    pub fn as_seed(self) -> Self {
        self.state.lock().seed = true;
        self
    }

    pub fn connecting(self) -> Self {
        self.state.lock().connecting = true;
        self
    }

    pub fn with_queue_time(self, queue_time: Duration) -> Self {
        self.state.lock().queue_time = queue_time;
        self
    }

    pub fn with_download_queue(self, blocks: Vec<BlockRef>) -> Self {
        self.state.lock().download_queue = blocks
            .into_iter()
            .map(|block| PendingBlock {
                block,
                timed_out: false,
                busy: false,
            })
            .collect();
        self
    }

    pub fn in_share_mode(self) -> Self {
        self.state.lock().share_mode = true;
        self
    }

    pub fn monitor(&self) -> ConnectionMonitor {
        ConnectionMonitor {
            id: self.id,
            remote: self.remote,
            state: Arc::clone(&self.state),
        }
    }
}

impl PeerConnection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn kind(&self) -> ConnectionKind {
        self.kind
    }

    fn remote(&self) -> SocketAddr {
        self.remote
    }

    fn local_endpoint(&self) -> SocketAddr {
        self.local
    }

    fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    fn peer(&self) -> Option<PeerHandle> {
        self.state.lock().peer
    }

    fn set_peer(&mut self, peer: Option<PeerHandle>) {
        self.state.lock().peer = peer;
    }

    fn is_connecting(&self) -> bool {
        self.state.lock().connecting
    }

    fn is_disconnecting(&self) -> bool {
        self.state.lock().disconnected.is_some()
    }

    fn is_seed(&self) -> bool {
        self.state.lock().seed
    }

    fn is_peer_interested(&self) -> bool {
        self.state.lock().interested
    }

    fn in_share_mode(&self) -> bool {
        self.state.lock().share_mode
    }

    fn failed(&self) -> bool {
        self.state.lock().failed
    }

    fn fast_reconnect(&self) -> bool {
        self.state.lock().fast_reconnect
    }

    fn has_piece(&self, piece: PieceIndex) -> bool {
        let state = self.state.lock();
        state.seed || state.pieces.contains(&piece)
    }

    fn have_pieces(&self) -> Vec<PieceIndex> {
        self.state.lock().pieces.iter().copied().collect()
    }

    fn download_queue(&self) -> Vec<PendingBlock> {
        self.state.lock().download_queue.clone()
    }

    fn request_queue(&self) -> Vec<PendingBlock> {
        self.state.lock().request_queue.clone()
    }

    fn download_queue_time(&self, _extra_bytes: u32) -> Duration {
        self.state.lock().queue_time
    }

    fn can_request_time_critical(&self) -> bool {
        self.state.lock().time_critical_allowed
    }

    fn add_request(&mut self, block: BlockRef, flags: RequestFlags) -> bool {
        let mut state = self.state.lock();
        if state.refuse_requests {
            return false;
        }
        let pending = PendingBlock {
            block,
            timed_out: false,
            busy: flags.busy,
        };
        if flags.time_critical {
            state.request_queue.insert(0, pending);
        } else {
            state.request_queue.push(pending);
        }
        true
    }

    fn make_time_critical(&mut self, block: BlockRef) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.request_queue.iter().position(|p| p.block == block) else {
            return false;
        };
        let pending = state.request_queue.remove(pos);
        state.request_queue.insert(0, pending);
        true
    }

    fn cancel_request(&mut self, block: BlockRef) {
        let mut state = self.state.lock();
        state.request_queue.retain(|p| p.block != block);
        state.download_queue.retain(|p| p.block != block);
        state.cancelled.push(block);
    }

    fn send_block_requests(&mut self) {
        let mut state = self.state.lock();
        let queued = std::mem::take(&mut state.request_queue);
        state.sent_requests += queued.len();
        state.download_queue.extend(queued);
    }

    fn announce_piece(&mut self, piece: PieceIndex) {
        self.state.lock().announced.push(piece);
    }

    fn send_dont_have(&mut self, piece: PieceIndex) {
        self.state.lock().dont_have.push(piece);
    }

    fn send_upload_only(&mut self, upload_only: bool) {
        self.state.lock().upload_only = Some(upload_only);
    }

    fn send_share_mode(&mut self, share_mode: bool) {
        self.state.lock().share_mode_sent = Some(share_mode);
    }

    fn update_interest(&mut self) {
        self.state.lock().interest_updates += 1;
    }

    fn received_valid_data(&mut self, piece: PieceIndex) {
        self.state.lock().valid_data.push(piece);
    }

    fn received_invalid_data(&mut self, piece: PieceIndex, _single_peer: bool) -> bool {
        let mut state = self.state.lock();
        state.invalid_data.push(piece);
        state.keep_on_invalid_data
    }

    fn disconnect(&mut self, reason: DisconnectReason) {
        self.state.lock().disconnected.get_or_insert(reason);
    }

    fn stats(&self) -> ConnectionStats {
        self.state.lock().stats
    }
}

/// Hands out [`MockConnection`]s for outgoing attempts.
#[derive(Debug)]
pub struct MockConnectionFactory {
    next_id: AtomicU64,
    refused: Mutex<HashSet<SocketAddr>>,
    refuse_all: AtomicBool,
    attempts: Mutex<Vec<PeerEndpoint>>,
    monitors: Mutex<HashMap<ConnectionId, ConnectionMonitor>>,
}

impl Default for MockConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self::starting_at(1000)
    }

    /// Ids of created connections count up from `first_id`.
    pub fn starting_at(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            refused: Mutex::new(HashSet::new()),
            refuse_all: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
            monitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn refuse(&self, addr: SocketAddr) {
        self.refused.lock().insert(addr);
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Every endpoint a connection was attempted to, in order.
    pub fn attempts(&self) -> Vec<PeerEndpoint> {
        self.attempts.lock().clone()
    }

    pub fn monitor(&self, id: ConnectionId) -> Option<ConnectionMonitor> {
        self.monitors.lock().get(&id).cloned()
    }

    /// Latest live connection created for `addr`.
    pub fn monitor_for(&self, addr: SocketAddr) -> Option<ConnectionMonitor> {
        self.monitors
            .lock()
            .values()
            .filter(|p| p.remote == addr && p.disconnect_reason().is_none())
            .max_by_key(|p| p.id)
            .cloned()
    }

    /// Monitors of every connection created so far.
    pub fn monitors(&self) -> Vec<ConnectionMonitor> {
        let mut monitors: Vec<_> = self.monitors.lock().values().cloned().collect();
        monitors.sort_by_key(|p| p.id);
        monitors
    }
}

impl ConnectionFactory for MockConnectionFactory {
    fn connect(
        &self,
        _info_hash: InfoHash,
        endpoint: &PeerEndpoint,
    ) -> Result<Box<dyn PeerConnection>, TorrentError> {
        self.attempts.lock().push(endpoint.clone());
        let PeerEndpoint::Ip(addr) = endpoint else {
            return Err(TorrentError::PeerRejected {
                address: endpoint.clone(),
            });
        };
        if self.refuse_all.load(Ordering::SeqCst) || self.refused.lock().contains(addr) {
            return Err(TorrentError::PeerRejected {
                address: endpoint.clone(),
            });
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let connection = MockConnection::new(id, *addr).outgoing().connecting();
        self.monitors.lock().insert(id, connection.monitor());
        Ok(Box::new(connection))
    }
}

#[derive(Debug)]
struct QueuedJob {
    info_hash: InfoHash,
    id: JobId,
    job: DiskJob,
    aborted: bool,
}

#[derive(Debug)]
struct DiskState {
    queue: VecDeque<QueuedJob>,
    submitted: Vec<(InfoHash, DiskJob)>,
    blocks: HashMap<(InfoHash, BlockRef), Bytes>,
    failures: HashMap<DiskOperation, DiskErrorKind>,
    fastresume: FastresumeResult,
    aborts: Vec<InfoHash>,
}

/// In-memory disk.
///
/// Jobs queue up until the test completes them, or complete right away
/// when the disk was built with [`MockDisk::auto`]. Written blocks are
/// kept so hash jobs compute real digests.
#[derive(Debug)]
pub struct MockDisk {
    state: Mutex<DiskState>,
    events: Option<EventSender>,
}

impl Default for MockDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDisk {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DiskState {
                queue: VecDeque::new(),
                submitted: Vec::new(),
                blocks: HashMap::new(),
                failures: HashMap::new(),
                fastresume: FastresumeResult::Valid,
                aborts: Vec::new(),
            }),
            events: None,
        }
    }

    /// Completes every job on submit and delivers it through `events`.
    pub fn auto(events: EventSender) -> Self {
        Self {
            events: Some(events),
            ..Self::new()
        }
    }

    /// Fails every later job of `operation` with `kind`.
    pub fn fail(&self, operation: DiskOperation, kind: DiskErrorKind) {
        self.state.lock().failures.insert(operation, kind);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    pub fn set_fastresume_result(&self, result: FastresumeResult) {
        self.state.lock().fastresume = result;
    }

    /// Pretends `data` is already on disk for `piece`.
    pub fn store_piece(&self, info_hash: InfoHash, piece: PieceIndex, data: &Bytes) {
        let mut state = self.state.lock();
        for (index, chunk) in data.chunks(BLOCK_SIZE as usize).enumerate() {
            let block = BlockRef::new(piece, index as u32);
            state
                .blocks
                .insert((info_hash, block), data.slice_ref(chunk));
        }
    }

    /// Every job submitted so far.
    pub fn submitted(&self) -> Vec<DiskJob> {
        self.state.lock().submitted.iter().map(|(_, job)| job.clone()).collect()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn aborts(&self) -> Vec<InfoHash> {
        self.state.lock().aborts.clone()
    }

    pub fn has_piece_data(&self, info_hash: InfoHash, piece: PieceIndex) -> bool {
        self.state
            .lock()
            .blocks
            .keys()
            .any(|(hash, block)| *hash == info_hash && block.piece == piece)
    }

    /// Runs the oldest queued job.
    pub fn complete_next(&self) -> Option<DiskCompletion> {
        let mut state = self.state.lock();
        let queued = state.queue.pop_front()?;
        Some(run_job(&mut state, queued))
    }

    /// Runs every queued job in submission order.
    pub fn complete_all(&self) -> Vec<DiskCompletion> {
        let mut state = self.state.lock();
        let mut completions = Vec::new();
        while let Some(queued) = state.queue.pop_front() {
            completions.push(run_job(&mut state, queued));
        }
        completions
    }
}

impl DiskIo for MockDisk {
    fn submit(&self, info_hash: InfoHash, job: JobId, request: DiskJob) {
        let mut state = self.state.lock();
        state.submitted.push((info_hash, request.clone()));
        let queued = QueuedJob {
            info_hash,
            id: job,
            job: request,
            aborted: false,
        };
        match &self.events {
            Some(events) => {
                let completion = run_job(&mut state, queued);
                events.disk_completed(completion);
            }
            None => state.queue.push_back(queued),
        }
    }

    fn abort(&self, info_hash: InfoHash) {
        let mut state = self.state.lock();
        state.aborts.push(info_hash);
        for queued in state.queue.iter_mut().filter(|q| q.info_hash == info_hash) {
            queued.aborted = true;
        }
    }
}

fn placeholder_outcome(job: &DiskJob) -> DiskOutcome {
    match job {
        DiskJob::Read { block, .. } => DiskOutcome::Read {
            block: *block,
            data: Bytes::new(),
        },
        DiskJob::Write { block, .. } => DiskOutcome::Written { block: *block },
        DiskJob::Hash { piece } => DiskOutcome::Hashed {
            piece: *piece,
            digest: [0; 20],
        },
        DiskJob::CheckFastresume { .. } => DiskOutcome::Fastresume(FastresumeResult::NeedFullCheck),
        DiskJob::ReleaseFiles => DiskOutcome::Released,
        DiskJob::RenameFile { file, name } => DiskOutcome::Renamed {
            file: *file,
            name: name.clone(),
        },
        DiskJob::MoveStorage { path } => DiskOutcome::Moved { path: path.clone() },
        DiskJob::DeleteFiles => DiskOutcome::Deleted,
        DiskJob::SaveResumeData => DiskOutcome::ResumeSaved,
    }
}

fn run_job(state: &mut DiskState, queued: QueuedJob) -> DiskCompletion {
    let QueuedJob {
        info_hash,
        id,
        job,
        aborted,
    } = queued;
    if aborted {
        return DiskCompletion::aborted(info_hash, id, placeholder_outcome(&job));
    }
    let operation = job.operation();
    if let Some(&kind) = state.failures.get(&operation) {
        let error = DiskError::new(kind, operation, "injected failure");
        return DiskCompletion::failed(info_hash, id, placeholder_outcome(&job), error);
    }

    let outcome = match job {
        DiskJob::Write { block, data } => {
            state.blocks.insert((info_hash, block), data);
            DiskOutcome::Written { block }
        }
        DiskJob::Read { block, .. } => match state.blocks.get(&(info_hash, block)) {
            Some(data) => DiskOutcome::Read {
                block,
                data: data.clone(),
            },
            None => {
                let error = DiskError::new(DiskErrorKind::NotFound, operation, "block not on disk");
                let outcome = DiskOutcome::Read {
                    block,
                    data: Bytes::new(),
                };
                return DiskCompletion::failed(info_hash, id, outcome, error);
            }
        },
        DiskJob::Hash { piece } => {
            let mut blocks: Vec<_> = state
                .blocks
                .iter()
                .filter(|((hash, block), _)| *hash == info_hash && block.piece == piece)
                .map(|((_, block), data)| (block.block, data.clone()))
                .collect();
            blocks.sort_by_key(|(index, _)| *index);
            let mut piece_data = BytesMut::new();
            for (_, data) in blocks {
                piece_data.extend_from_slice(&data);
            }
            DiskOutcome::Hashed {
                piece,
                digest: sha1_digest(&piece_data),
            }
        }
        DiskJob::CheckFastresume { .. } => DiskOutcome::Fastresume(state.fastresume),
        DiskJob::ReleaseFiles => DiskOutcome::Released,
        DiskJob::RenameFile { file, name } => DiskOutcome::Renamed { file, name },
        DiskJob::MoveStorage { path } => DiskOutcome::Moved { path },
        DiskJob::DeleteFiles => {
            state.blocks.retain(|(hash, _), _| *hash != info_hash);
            DiskOutcome::Deleted
        }
        DiskJob::SaveResumeData => DiskOutcome::ResumeSaved,
    };
    DiskCompletion::success(info_hash, id, outcome)
}

/// Records tracker requests instead of sending them.
#[derive(Debug, Default)]
pub struct MockTrackerTransport {
    requests: Mutex<Vec<TrackerRequest>>,
}

impl MockTrackerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<TrackerRequest> {
        self.requests.lock().clone()
    }

    pub fn take_requests(&self) -> Vec<TrackerRequest> {
        std::mem::take(&mut *self.requests.lock())
    }
}

impl TrackerTransport for MockTrackerTransport {
    fn queue_request(&self, request: TrackerRequest) {
        self.requests.lock().push(request);
    }
}

/// DHT node that records announces.
#[derive(Debug)]
pub struct MockDht {
    running: AtomicBool,
    announces: Mutex<Vec<(InfoHash, u16, bool)>>,
}

impl Default for MockDht {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDht {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            announces: Mutex::new(Vec::new()),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// `(info_hash, listen_port, seed)` of every announce.
    pub fn announces(&self) -> Vec<(InfoHash, u16, bool)> {
        self.announces.lock().clone()
    }
}

impl DhtService for MockDht {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn announce(&self, info_hash: InfoHash, listen_port: u16, seed: bool) {
        self.announces.lock().push((info_hash, listen_port, seed));
    }
}

/// Local service discovery that records announces.
#[derive(Debug, Default)]
pub struct MockLsd {
    announces: Mutex<Vec<InfoHash>>,
}

impl MockLsd {
    pub fn announces(&self) -> Vec<InfoHash> {
        self.announces.lock().clone()
    }
}

impl LsdService for MockLsd {
    fn announce(&self, info_hash: InfoHash, _listen_port: u16) {
        self.announces.lock().push(info_hash);
    }
}

/// One set of mock collaborators with handles kept for inspection.
#[derive(Debug, Clone)]
pub struct MockServices {
    pub disk: Arc<MockDisk>,
    pub tracker: Arc<MockTrackerTransport>,
    pub dht: Arc<MockDht>,
    pub lsd: Arc<MockLsd>,
    pub connector: Arc<MockConnectionFactory>,
}

impl Default for MockServices {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServices {
    /// Services with a manually completed disk.
    pub fn new() -> Self {
        Self::with_disk(MockDisk::new())
    }

    /// Services whose disk completes jobs into `events`.
    pub fn auto(events: EventSender) -> Self {
        Self::with_disk(MockDisk::auto(events))
    }

    fn with_disk(disk: MockDisk) -> Self {
        Self {
            disk: Arc::new(disk),
            tracker: Arc::new(MockTrackerTransport::new()),
            dht: Arc::new(MockDht::new()),
            lsd: Arc::new(MockLsd::default()),
            connector: Arc::new(MockConnectionFactory::new()),
        }
    }

    pub fn collaborators(&self, alerts: AlertSink) -> Collaborators {
        Collaborators {
            disk: self.disk.clone(),
            tracker: self.tracker.clone(),
            dht: Some(self.dht.clone()),
            lsd: Some(self.lsd.clone()),
            connector: self.connector.clone(),
            alerts,
            picker: None,
        }
    }
}

/// Generated single-file torrent with real piece hashes.
#[derive(Debug, Clone)]
pub struct TestTorrent {
    pub info_hash: InfoHash,
    /// Bencoded info dictionary
    pub info: Bytes,
    pub layout: TorrentLayout,
    pub pieces: Vec<Bytes>,
}

impl TestTorrent {
    /// `num_pieces` full pieces of `piece_length` bytes.
    pub fn new(num_pieces: u32, piece_length: u32) -> Self {
        Self::named("test-torrent", num_pieces, piece_length)
    }

    pub fn named(name: &str, num_pieces: u32, piece_length: u32) -> Self {
        let pieces: Vec<Bytes> = (0..num_pieces)
            .map(|piece| {
                (0..piece_length)
                    .map(|i| (piece.wrapping_mul(31).wrapping_add(i) % 251) as u8)
                    .collect::<Vec<u8>>()
                    .into()
            })
            .collect();
        let hashes: Vec<[u8; 20]> = pieces.iter().map(|p| sha1_digest(p)).collect();
        let total = u64::from(num_pieces) * u64::from(piece_length);

        let mut info = Vec::new();
        info.extend_from_slice(format!("d6:lengthi{total}e4:name{}:{name}", name.len()).as_bytes());
        info.extend_from_slice(format!("12:piece lengthi{piece_length}e6:pieces{}:", hashes.len() * 20).as_bytes());
        for hash in &hashes {
            info.extend_from_slice(hash);
        }
        info.push(b'e');

        let layout = TorrentLayout::new(name, piece_length, hashes, vec![(vec![name.to_string()], total, false)]);
        Self {
            info_hash: InfoHash::new(sha1_digest(&info)),
            info: info.into(),
            layout,
            pieces,
        }
    }

    pub fn piece(&self, piece: u32) -> Bytes {
        self.pieces[piece as usize].clone()
    }

    /// Data of one block.
    pub fn block(&self, block: BlockRef) -> Bytes {
        let data = &self.pieces[block.piece.as_usize()];
        let start = (block.block * BLOCK_SIZE) as usize;
        let end = (start + BLOCK_SIZE as usize).min(data.len());
        data.slice(start..end)
    }

    /// Blocks of a piece in order.
    pub fn blocks(&self, piece: u32) -> Vec<BlockRef> {
        let count = self.layout.blocks_in_piece(PieceIndex::new(piece));
        (0..count).map(|b| BlockRef::new(PieceIndex::new(piece), b)).collect()
    }
}

/// Resume store in a fresh temporary directory, removed on drop.
#[cfg(feature = "test-utils")]
pub fn temp_resume_store() -> std::io::Result<(tempfile::TempDir, crate::torrent::FileResumeStore)> {
    let dir = tempfile::tempdir()?;
    let store = crate::torrent::FileResumeStore::new(dir.path().join("resume"));
    Ok((dir, store))
}
